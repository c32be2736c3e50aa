//! Login state machine.
//!
//! Drives the site's login flow to a terminal state within a caller-supplied
//! timeout. With credentials present the flow is fully automated; without
//! them the automaton navigates to the login surface and polls while a human
//! completes the form. Challenge and CAPTCHA surfaces are detected and fail
//! deterministically; solving them is out of scope.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::{Element, Page};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Credentials;

use super::SessionLease;

/// Identifier input candidates, in priority order.
const IDENTIFIER_INPUTS: &[&str] = &[
    "input[autocomplete=\"username\"]",
    "input[name=\"text\"]",
    "input[type=\"text\"]",
];

/// Password input candidates, in priority order.
const PASSWORD_INPUTS: &[&str] = &[
    "input[name=\"password\"]",
    "input[autocomplete=\"current-password\"]",
    "input[type=\"password\"]",
];

/// Button-text candidates advancing past the identifier step
/// (case-insensitive substring match).
const NEXT_BUTTON_TEXTS: &[&str] = &["next", "continue", "log in", "confirm"];

/// Button-text candidates submitting the password step.
const SUBMIT_BUTTON_TEXTS: &[&str] = &["log in", "submit", "continue"];

/// Elements only present on an authenticated surface.
const AUTHENTICATED_MARKERS: &[&str] = &[
    "[data-testid=\"SideNav_AccountSwitcher_Button\"]",
    "[data-testid=\"AppTabBar_Home_Link\"]",
];

/// Second-factor / verification challenge inputs.
const CHALLENGE_MARKERS: &[&str] = &[
    "input[data-testid=\"ocfEnterTextTextInput\"]",
    "input[name=\"challenge_response\"]",
];

/// URL fragments marking a challenge interstitial.
const CHALLENGE_URL_MARKERS: &[&str] = &["/account/access", "challenge"];

/// Embedded CAPTCHA frames.
const CAPTCHA_FRAME_MARKERS: &[&str] = &["iframe[src*=\"captcha\"]", "iframe[src*=\"arkose\"]"];

/// Visible inline error elements.
const ERROR_MARKERS: &[&str] = &["[data-testid=\"error\"]", "[role=\"alert\"]"];

/// Progress through the login flow. Forward-only, except that a detected
/// recoverable error refreshes the page back to `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Init,
    EnteringIdentifier,
    EnteringPassword,
    Submitted,
    Success,
    Blocked,
    TimedOut,
}

impl LoginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::EnteringIdentifier => "entering_identifier",
            Self::EnteringPassword => "entering_password",
            Self::Submitted => "submitted",
            Self::Success => "success",
            Self::Blocked => "blocked",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Blocked | Self::TimedOut)
    }
}

/// Terminal login failures. `Blocked` and `TimedOut` are equivalent from
/// the caller's perspective (both mean "not logged in"); the taxonomy is
/// for diagnostics only.
#[derive(Debug, Error)]
pub enum LoginFailure {
    #[error("credentials missing from environment (headless login requires {0} and {1})")]
    MissingCredentials(&'static str, &'static str),

    #[error("login blocked: {0}")]
    Blocked(String),

    #[error("login timed out after {0:?}")]
    TimedOut(Duration),

    #[error("browser became unresponsive during login: {0}")]
    Driver(String),
}

/// What one polling cycle observed on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    /// Authenticated UI element or URL pattern present.
    Authenticated,
    /// Second-factor / verification challenge present.
    Challenge,
    /// CAPTCHA marker in page content or an embedded frame.
    Captcha,
    /// Visible inline error element.
    InlineError,
    /// Nothing terminal yet; keep polling.
    Pending,
}

/// Observation seam for the `Submitted`-state polling loop. The live
/// implementation reads the browser page; tests script the sequence.
#[async_trait]
pub trait LoginProbe {
    /// Inspect the page once, checking terminal conditions in priority
    /// order.
    async fn observe(&mut self) -> Result<PollVerdict>;

    /// Reset the page after an inline error (page refresh).
    async fn refresh(&mut self) -> Result<()>;
}

/// Terminal result of the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollOutcome {
    Authenticated,
    Blocked(String),
    TimedOut,
    DriverFailure(String),
    /// Inline error observed; the caller resets to `Init` and retries.
    ErrorReset,
}

/// Poll the probe until a terminal condition, the deadline, or the
/// consecutive-error budget is hit. The error budget is a fail-fast guard:
/// a wedged driver must not spin until the deadline.
async fn poll_until_terminal<P: LoginProbe + ?Sized>(
    probe: &mut P,
    deadline: Instant,
    poll_interval: Duration,
    error_budget: u32,
) -> PollOutcome {
    let mut consecutive_errors = 0u32;

    loop {
        if Instant::now() >= deadline {
            return PollOutcome::TimedOut;
        }

        match probe.observe().await {
            Ok(verdict) => {
                consecutive_errors = 0;
                match verdict {
                    PollVerdict::Authenticated => return PollOutcome::Authenticated,
                    PollVerdict::Challenge => {
                        return PollOutcome::Blocked(
                            "verification challenge requires human input".to_string(),
                        )
                    }
                    PollVerdict::Captcha => {
                        return PollOutcome::Blocked("CAPTCHA detected".to_string())
                    }
                    PollVerdict::InlineError => return PollOutcome::ErrorReset,
                    PollVerdict::Pending => {}
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                debug!(
                    "Login poll error {}/{}: {}",
                    consecutive_errors, error_budget, e
                );
                if consecutive_errors >= error_budget {
                    return PollOutcome::DriverFailure(e.to_string());
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Live probe over the shared browser page.
struct PageProbe<'a> {
    page: &'a Page,
}

impl PageProbe<'_> {
    async fn any_element(&self, selectors: &[&str]) -> bool {
        for selector in selectors {
            // A missing element is an Err here; only url()/content() errors
            // indicate driver trouble.
            if self.page.find_element(*selector).await.is_ok() {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl LoginProbe for PageProbe<'_> {
    async fn observe(&mut self) -> Result<PollVerdict> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read page URL: {}", e))?
            .unwrap_or_default();

        // (a) authenticated surface
        if (url.contains("/home") && !url.contains("login"))
            || self.any_element(AUTHENTICATED_MARKERS).await
        {
            return Ok(PollVerdict::Authenticated);
        }

        // (b) challenge / second factor
        if CHALLENGE_URL_MARKERS.iter().any(|m| url.contains(m))
            || self.any_element(CHALLENGE_MARKERS).await
        {
            return Ok(PollVerdict::Challenge);
        }

        // (c) CAPTCHA frame or page content marker
        if self.any_element(CAPTCHA_FRAME_MARKERS).await {
            return Ok(PollVerdict::Captcha);
        }
        let content = self
            .page
            .content()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read page content: {}", e))?;
        if content.to_lowercase().contains("captcha") {
            return Ok(PollVerdict::Captcha);
        }

        // (d) visible inline error
        if self.any_element(ERROR_MARKERS).await {
            return Ok(PollVerdict::InlineError);
        }

        Ok(PollVerdict::Pending)
    }

    async fn refresh(&mut self) -> Result<()> {
        self.page
            .reload()
            .await
            .map_err(|e| anyhow::anyhow!("page refresh failed: {}", e))?;
        Ok(())
    }
}

/// Drives a live session to `Success` or a terminal failure.
pub struct LoginAutomaton {
    base_url: String,
    timeout: Duration,
    poll_interval: Duration,
    /// Inline-error resets allowed before giving up.
    max_attempts: u32,
    /// Consecutive driver-error budget while polling.
    error_budget: u32,
}

impl LoginAutomaton {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            poll_interval: Duration::from_secs(2),
            max_attempts: 3,
            error_budget: 5,
        }
    }

    fn login_url(&self) -> String {
        format!("{}/i/flow/login", self.base_url.trim_end_matches('/'))
    }

    fn home_url(&self) -> String {
        format!("{}/home", self.base_url.trim_end_matches('/'))
    }

    /// Drive the session to a terminal login state.
    ///
    /// Returns `Ok(())` only on `Success`; `Blocked` and `TimedOut` both
    /// surface as errors. When `credentials` is `None` and the browser is
    /// headless, fails immediately - nobody can complete the form.
    pub async fn login(
        &self,
        lease: &SessionLease<'_>,
        credentials: Option<&Credentials>,
        headless: bool,
    ) -> Result<(), LoginFailure> {
        if credentials.is_none() && headless {
            return Err(LoginFailure::MissingCredentials(
                Credentials::USERNAME_VAR,
                Credentials::PASSWORD_VAR,
            ));
        }

        let deadline = Instant::now() + self.timeout;
        let page = lease.page();

        // Cookie-restored fast path: if the home surface is reachable and an
        // authenticated-only element is present, there is nothing to do.
        if lease.navigate(&self.home_url()).await.is_ok() {
            let mut probe = PageProbe { page };
            if let Ok(PollVerdict::Authenticated) = probe.observe().await {
                info!("Session already authenticated (restored cookies)");
                return Ok(());
            }
        }

        let mut attempts = 0u32;
        loop {
            lease
                .navigate(&self.login_url())
                .await
                .map_err(|e| LoginFailure::Driver(e.to_string()))?;

            if let Some(creds) = credentials {
                self.enter_credentials(lease, creds, deadline).await?;
            } else {
                info!("No credentials configured; waiting for manual login in the browser window");
            }

            debug!("Login state: {}", LoginState::Submitted.as_str());
            let mut probe = PageProbe { page };
            let outcome =
                poll_until_terminal(&mut probe, deadline, self.poll_interval, self.error_budget)
                    .await;

            match outcome {
                PollOutcome::Authenticated => {
                    info!("Login successful");
                    return Ok(());
                }
                PollOutcome::Blocked(reason) => {
                    warn!("Login blocked: {}", reason);
                    return Err(LoginFailure::Blocked(reason));
                }
                PollOutcome::TimedOut => {
                    warn!("Login timed out after {:?}", self.timeout);
                    return Err(LoginFailure::TimedOut(self.timeout));
                }
                PollOutcome::DriverFailure(reason) => {
                    warn!("Browser unresponsive during login: {}", reason);
                    return Err(LoginFailure::Driver(reason));
                }
                PollOutcome::ErrorReset => {
                    attempts += 1;
                    if attempts >= self.max_attempts {
                        return Err(LoginFailure::Blocked(format!(
                            "login form reported errors {} times",
                            attempts
                        )));
                    }
                    warn!("Login error detected, refreshing page (attempt {})", attempts);
                    let mut probe = PageProbe { page };
                    if let Err(e) = probe.refresh().await {
                        return Err(LoginFailure::Driver(e.to_string()));
                    }
                }
            }
        }
    }

    /// Automated credential entry: identifier, advance, password, submit.
    async fn enter_credentials(
        &self,
        lease: &SessionLease<'_>,
        credentials: &Credentials,
        deadline: Instant,
    ) -> Result<(), LoginFailure> {
        let page = lease.page();

        debug!("Login state: {}", LoginState::EnteringIdentifier.as_str());
        let input = self.locate_input(page, IDENTIFIER_INPUTS, deadline).await?;
        self.type_into(&input, &credentials.username).await?;
        self.activate_button(page, NEXT_BUTTON_TEXTS, deadline).await?;

        debug!("Login state: {}", LoginState::EnteringPassword.as_str());
        let input = self.locate_input(page, PASSWORD_INPUTS, deadline).await?;
        self.type_into(&input, &credentials.password).await?;
        self.activate_button(page, SUBMIT_BUTTON_TEXTS, deadline).await?;

        Ok(())
    }

    /// Locate the first matching input among the candidates, retrying until
    /// the deadline.
    async fn locate_input(
        &self,
        page: &Page,
        candidates: &[&str],
        deadline: Instant,
    ) -> Result<Element, LoginFailure> {
        loop {
            for selector in candidates {
                if let Ok(element) = page.find_element(*selector).await {
                    return Ok(element);
                }
            }
            if Instant::now() >= deadline {
                return Err(LoginFailure::TimedOut(self.timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn type_into(&self, element: &Element, value: &str) -> Result<(), LoginFailure> {
        element
            .click()
            .await
            .map_err(|e| LoginFailure::Driver(format!("failed to focus input: {}", e)))?;
        element
            .type_str(value)
            .await
            .map_err(|e| LoginFailure::Driver(format!("failed to type into input: {}", e)))?;
        Ok(())
    }

    /// Activate the first button whose label contains one of the candidate
    /// texts (case-insensitive), retrying until the deadline.
    async fn activate_button(
        &self,
        page: &Page,
        texts: &[&str],
        deadline: Instant,
    ) -> Result<(), LoginFailure> {
        loop {
            if let Ok(buttons) = page.find_elements("div[role=\"button\"], button").await {
                for button in buttons {
                    let label = match button.inner_text().await {
                        Ok(Some(label)) => label.trim().to_lowercase(),
                        _ => continue,
                    };
                    if texts.iter().any(|t| label.contains(t))
                        && button.click().await.is_ok()
                    {
                        return Ok(());
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(LoginFailure::TimedOut(self.timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
