//! Dispatcher-wide cookie store and acceptance policy

use super::Dispatcher;
use crate::cookie::{AcceptNone, CookiePolicy, CookieStore};
use crate::error::{Error, Result};
use crate::request::Response;
use crate::types::TaskId;
use std::sync::{Arc, PoisonError};
use url::Url;

/// Store and policy in effect for one task
#[derive(Clone)]
pub(crate) struct CookieSettings {
    /// None disables cookie persistence
    pub(crate) store: Option<Arc<dyn CookieStore>>,
    pub(crate) policy: Arc<dyn CookiePolicy>,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            store: None,
            policy: Arc::new(AcceptNone),
        }
    }
}

impl Dispatcher {
    /// Replace the cookie store and policy used by every worker
    ///
    /// Takes effect for tasks that start afterwards; running tasks keep the
    /// settings they started with. A `None` store disables cookie handling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `policy` is `None`.
    pub fn configure_cookies(
        &self,
        store: Option<Arc<dyn CookieStore>>,
        policy: Option<Arc<dyn CookiePolicy>>,
    ) -> Result<()> {
        let policy = policy
            .ok_or_else(|| Error::config("cookie_policy", "a cookie policy is required"))?;
        let enabled = store.is_some();
        *self.cookies.write().unwrap_or_else(PoisonError::into_inner) =
            CookieSettings { store, policy };
        tracing::debug!(store_enabled = enabled, "Cookie handling reconfigured");
        Ok(())
    }

    /// Snapshot of the current cookie settings
    pub(crate) fn cookie_settings(&self) -> CookieSettings {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Origin that cookies from `url` are stored under
pub(crate) fn cookie_origin(url: &Url) -> Result<Url> {
    match url.host_str() {
        Some(host) if !host.is_empty() => {
            let mut origin = url.clone();
            origin.set_query(None);
            origin.set_fragment(None);
            Ok(origin)
        }
        _ => Err(Error::CookieConversion(format!("URL '{}' has no host", url))),
    }
}

/// Value of the `Cookie` header for a request to `url`, if any cookie applies
pub(crate) fn request_cookie_header(settings: &CookieSettings, url: &Url) -> Option<String> {
    let store = settings.store.as_ref()?;
    let cookies = store.get(url);
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|c| c.pair())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Offer every `Set-Cookie` of `response` to the policy and store the accepted ones
///
/// Returns the number of cookies stored. Failures are logged and never affect
/// the task's outcome.
pub(crate) fn store_response_cookies<T>(
    settings: &CookieSettings,
    id: TaskId,
    response: &Response<T>,
) -> usize {
    let Some(store) = &settings.store else {
        return 0;
    };
    let cookies = response.cookies();
    if cookies.is_empty() {
        return 0;
    }

    let origin = match cookie_origin(response.url()) {
        Ok(origin) => origin,
        Err(e) => {
            tracing::warn!(task_id = %id, error = %e, "Dropping response cookies");
            return 0;
        }
    };

    let mut stored = 0;
    for cookie in cookies {
        if settings.policy.should_accept(&origin, &cookie) {
            tracing::trace!(task_id = %id, name = %cookie.name, "Storing cookie");
            store.add(&origin, cookie);
            stored += 1;
        }
    }
    stored
}
