//! Contracts between booting nodes and the controller verifying them

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

#[cfg(test)]
use mockall::automock;

/// Port nodeup answers identity challenges on
pub const CHALLENGE_PORT: u16 = 3987;

/// Identity proven by a bootstrap request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    /// Kubernetes node name
    pub node_name: String,
    /// Instance group the node belongs to
    pub instance_group_name: String,
    /// Names and addresses the node may hold certificates for
    pub certificate_names: Vec<String>,
    /// `<ip>:<port>` the controller challenges the node on
    pub challenge_endpoint: String,
}

/// Checks bootstrap tokens on the controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verify `token` (the `Authorization` header) sent with `body`
    async fn verify_token(&self, token: &str, body: &[u8]) -> Result<VerifyResult>;
}

/// Produces bootstrap tokens on the node
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Token to send with `body`
    async fn create_token(&self, body: &[u8]) -> Result<String>;
}

/// Tries each verifier in turn, skipping those the token is not meant for
pub struct ChainVerifier {
    verifiers: Vec<Box<dyn Verifier>>,
}

impl ChainVerifier {
    /// Chain of `verifiers`, consulted in order
    pub fn new(verifiers: Vec<Box<dyn Verifier>>) -> Self {
        Self { verifiers }
    }
}

#[async_trait]
impl Verifier for ChainVerifier {
    async fn verify_token(&self, token: &str, body: &[u8]) -> Result<VerifyResult> {
        for verifier in &self.verifiers {
            match verifier.verify_token(token, body).await {
                Err(e) if e.is_not_this_verifier() => continue,
                other => return other,
            }
        }
        Err(crate::VerifyError::NotThisVerifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VerifyError;

    fn declines() -> Box<dyn Verifier> {
        let mut v = MockVerifier::new();
        v.expect_verify_token()
            .returning(|_, _| Err(VerifyError::NotThisVerifier));
        Box::new(v)
    }

    fn accepts(node: &'static str) -> Box<dyn Verifier> {
        let mut v = MockVerifier::new();
        v.expect_verify_token().returning(move |_, _| {
            Ok(VerifyResult {
                node_name: node.to_string(),
                ..Default::default()
            })
        });
        Box::new(v)
    }

    #[tokio::test]
    async fn chain_skips_verifiers_for_other_providers() {
        let chain = ChainVerifier::new(vec![declines(), accepts("a"), accepts("b")]);
        let result = chain.verify_token("token", b"{}").await.unwrap();
        assert_eq!(result.node_name, "a");
    }

    #[tokio::test]
    async fn chain_stops_at_a_rejection() {
        let mut rejects = MockVerifier::new();
        rejects
            .expect_verify_token()
            .returning(|_, _| Err(VerifyError::rejected("wrong cluster")));
        let chain = ChainVerifier::new(vec![Box::new(rejects), accepts("b")]);
        let err = chain.verify_token("token", b"{}").await.unwrap_err();
        assert!(matches!(err, VerifyError::Rejected(_)));
    }

    #[tokio::test]
    async fn empty_chain_declines() {
        let err = ChainVerifier::new(Vec::new())
            .verify_token("token", b"{}")
            .await
            .unwrap_err();
        assert!(err.is_not_this_verifier());
    }
}
