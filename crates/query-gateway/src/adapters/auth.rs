//! Bearer token verification against configured grants.

use crate::domain::{AuthConfig, Identity, TokenGrant};
use crate::middleware::constant_time_compare;
use crate::ports::IdentityVerifier;
use async_trait::async_trait;

/// Verifies tokens against a fixed list of grants.
///
/// Every grant is compared on each call so the time taken does not depend on
/// which grant, if any, matches.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    grants: Vec<TokenGrant>,
}

impl StaticTokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            grants: config
                .tokens
                .iter()
                .filter(|grant| !grant.token.is_empty())
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<Identity> {
        if token.is_empty() {
            return None;
        }

        let mut matched = None;
        for grant in &self.grants {
            if constant_time_compare(token, &grant.token) && matched.is_none() {
                matched = Some(Identity {
                    user_id: grant.user_id.clone(),
                    company_id: grant.company_id.clone(),
                });
            }
        }
        matched
    }
}
