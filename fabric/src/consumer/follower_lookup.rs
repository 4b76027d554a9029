//! External follower lookup used by the `post.created` fan-out handler.
//!
//! Per `spec.md` §9's open questions: the source does not fully define this
//! collaborator's remote interface, so it is modeled here as a narrow
//! capability trait with no in-repo production implementation — callers
//! supply one backed by whatever service owns the social graph.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from a follower lookup call.
#[derive(Debug, Error, Clone)]
pub enum FollowerLookupError {
    /// The upstream collaborator was unreachable or returned an error.
    #[error("follower lookup failed: {0}")]
    Backend(String),
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `followers(user) -> [user_id]`, left to the collaborator's own
/// consistency model per `spec.md` §9.
pub trait FollowerLookup: Send + Sync {
    /// Resolve the current followers of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`FollowerLookupError::Backend`] if the upstream collaborator
    /// is unreachable.
    fn followers(&self, user_id: &str) -> BoxFuture<'_, Result<Vec<String>, FollowerLookupError>>;
}

impl fmt::Debug for dyn FollowerLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn FollowerLookup")
    }
}

/// A stand-in used where no social-graph service is wired in: every lookup
/// reports zero followers, so `post.created` fan-out becomes a no-op rather
/// than failing. Production deployments replace this with a
/// [`FollowerLookup`] backed by whichever service owns the social graph
/// (`spec.md` §9 leaves that interface undecided).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFollowerLookup;

impl FollowerLookup for NullFollowerLookup {
    fn followers(&self, _user_id: &str) -> BoxFuture<'_, Result<Vec<String>, FollowerLookupError>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_follower_lookup_reports_no_followers() {
        let lookup = NullFollowerLookup;
        assert_eq!(lookup.followers("u1").await.expect("no error"), Vec::<String>::new());
    }
}
