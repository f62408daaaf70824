//! Passthrough stage emitting a masked view of its input.

use super::masking::{mask_value, DEFAULT_MASK};
use super::{Stage, StageValue};
use crate::errors::StageFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Sink for [`LoggingStage`] records.
///
/// Called synchronously from `execute`; implementations must not panic.
pub trait Logger: Send + Sync {
    /// Records an informational message with an optional payload.
    fn info(&self, message: &str, data: Option<&Value>);

    /// Records an error.
    fn error(&self, message: &str, error: Option<&(dyn Error + 'static)>);
}

/// [`Logger`] forwarding to `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str, data: Option<&Value>) {
        match data {
            Some(data) => tracing::info!(data = %data, "{message}"),
            None => tracing::info!("{message}"),
        }
    }

    fn error(&self, message: &str, error: Option<&(dyn Error + 'static)>) {
        match error {
            Some(error) => tracing::error!(error = %error, "{message}"),
            None => tracing::error!("{message}"),
        }
    }
}

/// Options for [`LoggingStage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Whether the payload is attached to the record.
    pub log_data: bool,
    /// Paths masked in the attached payload.
    pub mask_fields: Vec<String>,
    /// Replacement for masked values.
    pub mask_token: String,
    /// Record message.
    pub message: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_data: false,
            mask_fields: Vec::new(),
            mask_token: DEFAULT_MASK.to_string(),
            message: "Processing data".to_string(),
        }
    }
}

impl LoggingOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables payload logging.
    #[must_use]
    pub fn with_log_data(mut self, log_data: bool) -> Self {
        self.log_data = log_data;
        self
    }

    /// Adds a masked path.
    #[must_use]
    pub fn mask(mut self, path: impl Into<String>) -> Self {
        self.mask_fields.push(path.into());
        self
    }

    /// Sets the mask token.
    #[must_use]
    pub fn with_mask_token(mut self, token: impl Into<String>) -> Self {
        self.mask_token = token.into();
        self
    }

    /// Sets the record message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Stage that logs its input and returns it untouched.
///
/// Exactly one `info` record is emitted per execution. The payload, when
/// enabled, is a masked copy of the input's JSON form.
pub struct LoggingStage<T> {
    name: String,
    logger: Arc<dyn Logger>,
    options: LoggingOptions,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> LoggingStage<T> {
    /// Creates a logging stage.
    pub fn new(logger: Arc<dyn Logger>, options: LoggingOptions) -> Self {
        Self {
            name: "LoggingStage".to_string(),
            logger,
            options,
            _marker: PhantomData,
        }
    }

    /// Sets the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the options.
    pub fn options(&self) -> &LoggingOptions {
        &self.options
    }
}

impl<T> fmt::Debug for LoggingStage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingStage")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: Serialize> LoggingStage<T> {
    fn payload(&self, input: &T) -> Option<Value> {
        if !self.options.log_data {
            return None;
        }

        match serde_json::to_value(input) {
            Ok(value) => Some(mask_value(
                &value,
                self.options.mask_fields.as_slice(),
                &self.options.mask_token,
            )),
            Err(err) => {
                let err: &(dyn Error + 'static) = &err;
                self.logger.error("Failed to serialize payload", Some(err));
                None
            }
        }
    }
}

#[async_trait]
impl<T> Stage<T, T> for LoggingStage<T>
where
    T: StageValue + Serialize,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: T) -> Result<T, StageFailure> {
        let payload = self.payload(&input);
        self.logger.info(&self.options.message, payload.as_ref());
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingLogger;
    use pretty_assertions::assert_eq;
    use serde::ser::Error as _;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Account {
        username: String,
        password: String,
        users: Vec<Member>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Member {
        email: String,
        password: String,
    }

    #[derive(Debug, Clone)]
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not representable"))
        }
    }

    fn account(members: usize) -> Account {
        Account {
            username: "root".into(),
            password: "toor".into(),
            users: (0..members)
                .map(|i| Member {
                    email: format!("m{i}@example.com"),
                    password: format!("pw{i}"),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_logs_without_payload_by_default() {
        let logger = Arc::new(RecordingLogger::new());
        let stage = LoggingStage::new(logger.clone(), LoggingOptions::default());

        let input = account(1);
        assert_eq!(stage.execute(input.clone()).await.unwrap(), input);
        assert_eq!(logger.infos(), vec![("Processing data".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_masks_logged_copy_only() {
        let logger = Arc::new(RecordingLogger::new());
        let stage = LoggingStage::new(
            logger.clone(),
            LoggingOptions::new().with_log_data(true).mask("password"),
        );

        let input = account(0);
        let output = stage.execute(input.clone()).await.unwrap();

        assert_eq!(output.password, "toor");
        assert_eq!(output, input);
        let infos = logger.infos();
        let (_, data) = &infos[0];
        assert_eq!(
            data.as_ref().unwrap(),
            &json!({ "username": "root", "password": "***", "users": [] })
        );
    }

    #[tokio::test]
    async fn test_wildcard_masks_every_member() {
        for members in [0, 1, 4] {
            let logger = Arc::new(RecordingLogger::new());
            let stage = LoggingStage::new(
                logger.clone(),
                LoggingOptions::new()
                    .with_log_data(true)
                    .mask("users.*.password")
                    .with_mask_token("[hidden]")
                    .with_message("Incoming account"),
            );

            let input = account(members);
            let output = stage.execute(input.clone()).await.unwrap();
            assert_eq!(output, input);

            let infos = logger.infos();
            assert_eq!(infos.len(), 1);
            let (message, data) = &infos[0];
            assert_eq!(message, "Incoming account");
            let logged = data.as_ref().unwrap();
            assert_eq!(logged["password"], "toor");
            let users = logged["users"].as_array().unwrap();
            assert_eq!(users.len(), members);
            assert!(users.iter().all(|user| user["password"] == "[hidden]"));
        }
    }

    #[tokio::test]
    async fn test_serialization_failure_is_reported() {
        let logger = Arc::new(RecordingLogger::new());
        let stage = LoggingStage::new(logger.clone(), LoggingOptions::new().with_log_data(true));

        stage.execute(Unserializable).await.unwrap();

        assert_eq!(logger.infos(), vec![("Processing data".to_string(), None)]);
        let errors = logger.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "Failed to serialize payload");
        assert_eq!(errors[0].1.as_deref(), Some("not representable"));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: LoggingOptions =
            serde_json::from_value(json!({ "log_data": true, "mask_fields": ["password"] }))
                .unwrap();
        assert!(options.log_data);
        assert_eq!(options.mask_fields, vec!["password".to_string()]);
        assert_eq!(options.mask_token, "***");
        assert_eq!(options.message, "Processing data");
    }
}
