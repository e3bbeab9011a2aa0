//! Display names and profiles, cached
//!
//! Lookups here are cosmetic. Failures degrade to the raw user id (names) or
//! `None` (profiles) and are never surfaced as errors.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use deskrelay_shared::{Profile, UserId};
use lru::LruCache;

use crate::format::escape_html;
use crate::transport::Transport;

/// Plain and HTML renditions of a user's name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub plain: String,
    pub rich: String,
}

pub struct IdentityResolver {
    transport: Arc<dyn Transport>,
    names: Mutex<LruCache<UserId, ResolvedName>>,
    profiles: Mutex<LruCache<UserId, Profile>>,
}

impl IdentityResolver {
    pub fn new(transport: Arc<dyn Transport>, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            transport,
            names: Mutex::new(LruCache::new(capacity)),
            profiles: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn resolve_name(&self, user: &UserId) -> ResolvedName {
        {
            let mut names = self.names.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(name) = names.get(user) {
                return name.clone();
            }
        }

        let display = match self.transport.display_name(user).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => user.to_string(),
            Err(e) => {
                tracing::debug!(user_id = %user, error = %e, "Display name lookup failed");
                user.to_string()
            }
        };
        let resolved = ResolvedName {
            rich: format!(
                "<a href=\"https://matrix.to/#/{}\">{}</a>",
                user,
                escape_html(&display)
            ),
            plain: display,
        };

        let mut names = self.names.lock().unwrap_or_else(|p| p.into_inner());
        names.put(user.clone(), resolved.clone());
        resolved
    }

    pub async fn resolve_profile(&self, user: &UserId) -> Option<Profile> {
        {
            let mut profiles = self.profiles.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(profile) = profiles.get(user) {
                return Some(profile.clone());
            }
        }

        match self.transport.profile(user).await {
            Ok(profile) => {
                let mut profiles = self.profiles.lock().unwrap_or_else(|p| p.into_inner());
                profiles.put(user.clone(), profile.clone());
                Some(profile)
            }
            Err(e) => {
                tracing::debug!(user_id = %user, error = %e, "Profile lookup failed");
                None
            }
        }
    }
}
