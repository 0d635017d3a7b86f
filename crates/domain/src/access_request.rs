use std::fmt::{Display, Formatter};

use chrono::{DateTime, TimeDelta, Utc};
use jitaccess_core::{AppError, AppResult, ObjectKey, ObjectMeta};
use serde::{Deserialize, Serialize};

/// Finalizer marker owned by the access request controller.
pub const ACCESS_REQUEST_FINALIZER: &str = "accessrequest.jit-access.io/finalizer";

/// Lifecycle state of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Submitted and waiting for a decision.
    Requested,
    /// Subject was bound to the role until the expiry timestamp.
    Granted,
    /// Permission gate refused the request.
    Denied,
    /// Grant lapsed and the subject was removed from the role.
    Expired,
}

impl RequestState {
    /// Returns a stable storage value for this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }

    /// Returns whether no further transition can leave this state.
    #[must_use]
    pub fn is_concluded(&self) -> bool {
        matches!(self, Self::Denied | Self::Expired)
    }

    /// Returns whether `next` directly follows this state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Granted)
                | (Self::Requested, Self::Denied)
                | (Self::Granted, Self::Expired)
        )
    }
}

impl Display for RequestState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Identity receiving the elevated role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Username added to the role's group list.
    pub username: String,
}

/// Application the elevated role is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetApplication {
    /// Application name.
    pub name: String,
    /// Namespace the application lives in.
    pub namespace: String,
}

impl TargetApplication {
    /// Returns the store key of the application.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.as_str(), self.name.as_str())
    }
}

/// Desired access, fixed at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequestSpec {
    /// Grant duration in seconds.
    pub duration_seconds: u64,
    /// Role template name in the request namespace.
    pub role_template_name: String,
    /// Target application.
    pub application: TargetApplication,
    /// Requesting subject.
    pub subject: Subject,
}

impl AccessRequestSpec {
    /// Returns the grant duration.
    pub fn duration(&self) -> AppResult<TimeDelta> {
        i64::try_from(self.duration_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "duration of {} seconds is out of range",
                    self.duration_seconds
                ))
            })
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// State entered.
    pub request_state: RequestState,
    /// When the state was entered.
    pub transitioned_at: DateTime<Utc>,
    /// Optional human readable detail.
    pub details: Option<String>,
}

/// Controller-owned status of an access request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessRequestStatus {
    request_state: Option<RequestState>,
    target_project: Option<String>,
    role_name: Option<String>,
    role_template_hash: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    history: Vec<StatusHistoryEntry>,
}

impl AccessRequestStatus {
    /// Returns the current state, `None` before initialization.
    #[must_use]
    pub fn request_state(&self) -> Option<RequestState> {
        self.request_state
    }

    /// Returns the project resolved from the application at initialization.
    #[must_use]
    pub fn target_project(&self) -> Option<&str> {
        self.target_project.as_deref()
    }

    /// Returns the rendered role name bound at initialization.
    #[must_use]
    pub fn role_name(&self) -> Option<&str> {
        self.role_name.as_deref()
    }

    /// Returns the fingerprint of the rendering last applied.
    #[must_use]
    pub fn role_template_hash(&self) -> Option<&str> {
        self.role_template_hash.as_deref()
    }

    /// Returns the grant expiry.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns the transition history in insertion order.
    #[must_use]
    pub fn history(&self) -> &[StatusHistoryEntry] {
        self.history.as_slice()
    }

    /// Returns the states of the history in insertion order.
    #[must_use]
    pub fn history_states(&self) -> Vec<RequestState> {
        self.history
            .iter()
            .map(|entry| entry.request_state)
            .collect()
    }
}

/// Request for temporary elevated access to a role on an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    metadata: ObjectMeta,
    spec: AccessRequestSpec,
    #[serde(default)]
    status: AccessRequestStatus,
}

impl AccessRequest {
    /// Creates a new, not yet reconciled request.
    #[must_use]
    pub fn new(key: ObjectKey, spec: AccessRequestSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            spec,
            status: AccessRequestStatus::default(),
        }
    }

    /// Returns the request key.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        self.metadata.key()
    }

    /// Returns object metadata.
    #[must_use]
    pub fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    /// Returns mutable object metadata.
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    /// Returns the immutable spec.
    #[must_use]
    pub fn spec(&self) -> &AccessRequestSpec {
        &self.spec
    }

    /// Returns the controller-owned status.
    #[must_use]
    pub fn status(&self) -> &AccessRequestStatus {
        &self.status
    }

    /// Overwrites the status with one computed on another copy of this object.
    pub fn replace_status(&mut self, status: AccessRequestStatus) {
        self.status = status;
    }

    /// Returns the key of the referenced role template.
    #[must_use]
    pub fn role_template_key(&self) -> ObjectKey {
        ObjectKey::new(
            self.key().namespace(),
            self.spec.role_template_name.as_str(),
        )
    }

    /// Returns the key of the resolved project, once initialized.
    #[must_use]
    pub fn project_key(&self) -> Option<ObjectKey> {
        self.status
            .target_project()
            .map(|project| ObjectKey::new(self.key().namespace(), project))
    }

    /// Returns the current state, `None` before initialization.
    #[must_use]
    pub fn request_state(&self) -> Option<RequestState> {
        self.status.request_state
    }

    /// Returns whether the request reached Denied or Expired.
    #[must_use]
    pub fn is_concluded(&self) -> bool {
        self.status
            .request_state
            .is_some_and(|state| state.is_concluded())
    }

    /// Returns whether the grant has lapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status.request_state == Some(RequestState::Granted)
            && self
                .status
                .expires_at
                .is_some_and(|expires_at| expires_at <= now)
    }

    /// Validates the spec fields required for reconciliation.
    pub fn validate(&self) -> AppResult<()> {
        let required = [
            ("subject username", self.spec.subject.username.as_str()),
            ("role template name", self.spec.role_template_name.as_str()),
            ("application name", self.spec.application.name.as_str()),
            (
                "application namespace",
                self.spec.application.namespace.as_str(),
            ),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "access request '{}' requires a non-empty {field}",
                    self.key()
                )));
            }
        }

        if self.spec.duration_seconds == 0 {
            return Err(AppError::Validation(format!(
                "access request '{}' duration must be greater than zero",
                self.key()
            )));
        }

        self.spec.duration().map(|_| ())
    }

    /// Records the initial Requested entry and the values resolved for it.
    ///
    /// Returns false when the status was already initialized.
    pub fn initialize_status(
        &mut self,
        target_project: &str,
        role_name: &str,
        role_template_hash: &str,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status.request_state.is_some() {
            return false;
        }

        self.status.request_state = Some(RequestState::Requested);
        self.status.target_project = Some(target_project.to_owned());
        self.status.role_name = Some(role_name.to_owned());
        self.status.role_template_hash = Some(role_template_hash.to_owned());
        self.status.history.push(StatusHistoryEntry {
            request_state: RequestState::Requested,
            transitioned_at: at,
            details: None,
        });
        true
    }

    /// Moves to Granted and fixes the expiry.
    ///
    /// Returns false when already Granted; the expiry is left untouched then.
    pub fn mark_granted(&mut self, at: DateTime<Utc>, role_template_hash: &str) -> AppResult<bool> {
        if !self.check_transition(RequestState::Granted)? {
            return Ok(false);
        }

        let expires_at = at
            .checked_add_signed(self.spec.duration()?)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "access request '{}' expiry overflows the calendar",
                    self.key()
                ))
            })?;

        self.status.expires_at = Some(expires_at);
        self.status.role_template_hash = Some(role_template_hash.to_owned());
        self.push_transition(RequestState::Granted, at, None);
        Ok(true)
    }

    /// Moves to Denied.
    pub fn mark_denied(&mut self, at: DateTime<Utc>, details: Option<String>) -> AppResult<bool> {
        if !self.check_transition(RequestState::Denied)? {
            return Ok(false);
        }

        self.push_transition(RequestState::Denied, at, details);
        Ok(true)
    }

    /// Moves to Expired.
    pub fn mark_expired(&mut self, at: DateTime<Utc>) -> AppResult<bool> {
        if !self.check_transition(RequestState::Expired)? {
            return Ok(false);
        }

        self.push_transition(RequestState::Expired, at, None);
        Ok(true)
    }

    /// Points a request still awaiting its decision at a renamed role.
    ///
    /// Returns true when the role name or fingerprint changed. Requests past
    /// Requested keep the role they were bound to.
    pub fn retarget_role(&mut self, role_name: &str, role_template_hash: &str) -> AppResult<bool> {
        if self.status.request_state != Some(RequestState::Requested) {
            return Err(AppError::Validation(format!(
                "access request '{}' can only change its role while requested",
                self.key()
            )));
        }

        let changed = self.status.role_name.as_deref() != Some(role_name)
            || self.status.role_template_hash.as_deref() != Some(role_template_hash);
        self.status.role_name = Some(role_name.to_owned());
        self.status.role_template_hash = Some(role_template_hash.to_owned());
        Ok(changed)
    }

    /// Stores a new rendering fingerprint and returns true when it differed.
    pub fn refresh_role_template_hash(&mut self, role_template_hash: &str) -> bool {
        if self.status.role_template_hash.as_deref() == Some(role_template_hash) {
            return false;
        }

        self.status.role_template_hash = Some(role_template_hash.to_owned());
        true
    }

    fn check_transition(&self, next: RequestState) -> AppResult<bool> {
        let current = self.status.request_state.ok_or_else(|| {
            AppError::Validation(format!(
                "access request '{}' status is not initialized",
                self.key()
            ))
        })?;

        if current == next {
            return Ok(false);
        }

        if !current.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "access request '{}' cannot move from '{current}' to '{next}'",
                self.key()
            )));
        }

        Ok(true)
    }

    fn push_transition(&mut self, state: RequestState, at: DateTime<Utc>, details: Option<String>) {
        self.status.request_state = Some(state);
        self.status.history.push(StatusHistoryEntry {
            request_state: state,
            transitioned_at: at,
            details,
        });
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use jitaccess_core::ObjectKey;
    use proptest::prelude::*;

    use super::{AccessRequest, AccessRequestSpec, RequestState, Subject, TargetApplication};

    fn request(duration_seconds: u64) -> AccessRequest {
        AccessRequest::new(
            ObjectKey::new("team-a", "request-1"),
            AccessRequestSpec {
                duration_seconds,
                role_template_name: "super-user".to_owned(),
                application: TargetApplication {
                    name: "checkout".to_owned(),
                    namespace: "team-a".to_owned(),
                },
                subject: Subject {
                    username: "alice".to_owned(),
                },
            },
        )
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, hour, minute, 0)
            .single()
            .unwrap_or_else(|| unreachable!())
    }

    fn initialized(duration_seconds: u64) -> AccessRequest {
        let mut request = request(duration_seconds);
        request.initialize_status("payments", "ephemeral-role", "hash-1", Utc::now());
        request
    }

    #[test]
    fn initialization_records_requested_once() {
        let mut request = request(60);
        let now = Utc::now();

        assert!(request.initialize_status("payments", "ephemeral-role", "hash-1", now));
        assert!(!request.initialize_status("other", "other-role", "hash-2", now));
        assert_eq!(request.status().history_states(), vec![RequestState::Requested]);
        assert_eq!(request.status().target_project(), Some("payments"));
        assert_eq!(request.status().role_name(), Some("ephemeral-role"));
    }

    #[test]
    fn grant_sets_expiry_from_duration() {
        let mut request = initialized(300);
        let granted_at = at(12, 0);

        let granted = request.mark_granted(granted_at, "hash-1");

        assert_eq!(granted, Ok(true));
        assert_eq!(request.status().expires_at(), Some(at(12, 5)));
    }

    #[test]
    fn repeated_grant_keeps_expiry_and_history() {
        let mut request = initialized(300);
        let first = at(12, 0);
        let later = at(12, 3);

        assert_eq!(request.mark_granted(first, "hash-1"), Ok(true));
        assert_eq!(request.mark_granted(later, "hash-1"), Ok(false));
        assert_eq!(request.status().history().len(), 2);
        assert_eq!(request.status().expires_at(), Some(at(12, 5)));
    }

    #[test]
    fn only_requested_requests_change_their_role() {
        let mut request = initialized(60);

        assert_eq!(
            request.retarget_role("ephemeral-renamed", "hash-2"),
            Ok(true)
        );
        assert_eq!(
            request.retarget_role("ephemeral-renamed", "hash-2"),
            Ok(false)
        );
        assert_eq!(request.status().role_name(), Some("ephemeral-renamed"));
        assert_eq!(
            request.status().history_states(),
            vec![RequestState::Requested]
        );

        assert_eq!(request.mark_granted(at(12, 0), "hash-2"), Ok(true));
        assert!(request.retarget_role("ephemeral-other", "hash-3").is_err());
        assert_eq!(request.status().role_name(), Some("ephemeral-renamed"));
    }

    #[test]
    fn denied_request_cannot_be_granted() {
        let mut request = initialized(60);

        assert_eq!(request.mark_denied(Utc::now(), None), Ok(true));
        assert!(request.mark_granted(Utc::now(), "hash-1").is_err());
        assert!(request.is_concluded());
    }

    #[test]
    fn expiry_is_detected_at_the_boundary() {
        let mut request = initialized(60);
        let granted_at = at(12, 0);
        assert_eq!(request.mark_granted(granted_at, "hash-1"), Ok(true));

        let boundary = at(12, 1);
        assert!(!request.is_expired_at(granted_at));
        assert!(request.is_expired_at(boundary));
    }

    #[test]
    fn validation_rejects_zero_duration_and_blank_subject() {
        assert!(request(0).validate().is_err());

        let mut blank_subject = request(60);
        blank_subject.spec.subject.username = "  ".to_owned();
        assert!(blank_subject.validate().is_err());

        assert!(request(60).validate().is_ok());
    }

    #[test]
    fn status_round_trips_through_json_with_defaults() {
        let parsed: Result<AccessRequest, _> = serde_json::from_str(
            r#"{
                "metadata": {"key": {"namespace": "team-a", "name": "request-1"}},
                "spec": {
                    "duration_seconds": 60,
                    "role_template_name": "super-user",
                    "application": {"name": "checkout", "namespace": "team-a"},
                    "subject": {"username": "alice"}
                }
            }"#,
        );

        assert!(parsed.is_ok());
        let request = parsed.unwrap_or_else(|_| unreachable!());
        assert_eq!(request.request_state(), None);
        assert!(request.status().history().is_empty());
    }

    #[derive(Debug, Clone, Copy)]
    enum Operation {
        Grant,
        Deny,
        Expire,
        Refresh,
    }

    fn operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            Just(Operation::Grant),
            Just(Operation::Deny),
            Just(Operation::Expire),
            Just(Operation::Refresh),
        ]
    }

    proptest! {
        #[test]
        fn history_is_always_a_prefix_of_an_allowed_path(
            operations in proptest::collection::vec(operation(), 0..12)
        ) {
            let mut request = initialized(60);
            for operation in operations {
                let now = Utc::now();
                let _ = match operation {
                    Operation::Grant => request.mark_granted(now, "hash-1"),
                    Operation::Deny => request.mark_denied(now, None),
                    Operation::Expire => request.mark_expired(now),
                    Operation::Refresh => Ok(request.refresh_role_template_hash("hash-2")),
                };
            }

            let states = request.status().history_states();
            let granted_path = [RequestState::Requested, RequestState::Granted, RequestState::Expired];
            let denied_path = [RequestState::Requested, RequestState::Denied];
            prop_assert!(
                granted_path.starts_with(states.as_slice())
                    || denied_path.starts_with(states.as_slice())
            );
            prop_assert_eq!(
                request.status().expires_at().is_some(),
                states.contains(&RequestState::Granted)
            );
        }
    }
}
