use crate::composer::Composer;
use crate::dialing::DialPlan;
use crate::engine::SessionManager;
use crate::error::Result;
use crate::types::{SendTask, TaskReceipt};
use std::sync::Arc;

/// Submission entry point: validate, compose and enqueue in one synchronous
/// call. Nothing here waits on the automation session.
#[derive(Clone)]
pub struct NotificationDispatcher {
    composer: Arc<Composer>,
    dial_plan: DialPlan,
    engine: Arc<SessionManager>,
    default_customer_name: String,
}

impl NotificationDispatcher {
    pub fn new(
        composer: Arc<Composer>,
        dial_plan: DialPlan,
        engine: Arc<SessionManager>,
        default_customer_name: impl Into<String>,
    ) -> Self {
        Self {
            composer,
            dial_plan,
            engine,
            default_customer_name: default_customer_name.into(),
        }
    }

    pub fn engine(&self) -> &Arc<SessionManager> {
        &self.engine
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn dial_plan(&self) -> &DialPlan {
        &self.dial_plan
    }

    /// An invalid recipient is rejected here and never enqueued.
    pub fn submit(
        &self,
        recipient_raw: &str,
        status_key: &str,
        customer_label: Option<&str>,
    ) -> Result<TaskReceipt> {
        let customer_label = self.customer_label(customer_label);
        let message_text = self.composer.compose(status_key, &customer_label);
        let task = SendTask::new(recipient_raw, &self.dial_plan, message_text, customer_label)?;
        self.engine.submit(task)
    }

    pub fn customer_label(&self, customer_label: Option<&str>) -> String {
        match customer_label.map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => self.default_customer_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NotificationDispatcher;
    use crate::composer::{Composer, PhraseMatrix};
    use crate::dialing::DialPlan;
    use crate::engine::{EngineSettings, SessionManager};
    use crate::error::DispatchError;
    use crate::protocol::{ProtocolTimings, SendProtocol};
    use crate::surface::LaunchOptions;
    use crate::surface::fake::{FakeLauncher, PageEvent};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn dispatcher(launcher: Arc<FakeLauncher>) -> NotificationDispatcher {
        let matrix = PhraseMatrix::new(
            vec!["Hi {customer_name}!".to_string()],
            HashMap::from([("saiu_entrega".to_string(), vec!["Order shipped!".to_string()])]),
            vec!["See you soon".to_string()],
        );
        let composer = Arc::new(Composer::new(Some(matrix), ""));
        let protocol = SendProtocol::new(
            "https://web.whatsapp.com",
            "footer",
            "span[data-icon='send']",
            ProtocolTimings::default(),
        );
        let settings = EngineSettings {
            launch: LaunchOptions {
                surface_url: "https://web.whatsapp.com".to_string(),
                profile_dir: PathBuf::from("/tmp/courier-dispatch-profile"),
                presentation_mode: false,
                user_agent: None,
                viewport: (1280, 720),
                executable: None,
            },
            connect_timeout: Duration::from_secs(120),
            max_retries: 3,
            backoff: Duration::from_secs(5),
            startup_window: Duration::from_secs(30),
        };
        let engine = Arc::new(SessionManager::new(launcher, protocol, settings));
        NotificationDispatcher::new(composer, DialPlan::default(), engine, "Customer")
    }

    #[tokio::test(start_paused = true)]
    async fn shipped_order_reaches_the_surface_with_name_and_body() {
        let launcher = FakeLauncher::new();
        let dispatcher = dispatcher(Arc::clone(&launcher));
        let shutdown = CancellationToken::new();
        let handle = dispatcher.engine().start(shutdown.clone());

        let receipt = dispatcher
            .submit("83981691823", "saiu_entrega", Some("Maria"))
            .expect("accepted");
        assert_eq!(receipt.recipient.as_str(), "5583981691823");

        for _ in 0..2_000 {
            if dispatcher.engine().status().delivered == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(dispatcher.engine().status().delivered, 1);

        let link = launcher
            .script
            .events()
            .into_iter()
            .find_map(|e| match e {
                PageEvent::Navigate(url) if url.contains("/send?") => Some(url),
                _ => None,
            })
            .expect("deep link navigation");
        let text = link.split("text=").nth(1).expect("text param");
        let decoded = urlencoding::decode(text).expect("utf-8 text");
        assert!(link.contains("phone=5583981691823"));
        assert!(decoded.contains("Maria"));
        assert!(decoded.contains("Order shipped!"));

        shutdown.cancel();
        handle.await.expect("engine task");
    }

    #[tokio::test]
    async fn invalid_recipient_is_never_enqueued() {
        let dispatcher = dispatcher(FakeLauncher::new());
        for raw in ["", "Telefone não cadastrado", "  --  "] {
            let err = dispatcher
                .submit(raw, "saiu_entrega", Some("Maria"))
                .expect_err("rejected");
            assert!(matches!(err, DispatchError::InvalidRecipient(_)));
        }
        let status = dispatcher.engine().status();
        assert_eq!(status.queue_depth, 0);
        assert_eq!(status.submitted, 0);
    }

    #[tokio::test]
    async fn blank_customer_label_uses_default_name() {
        let dispatcher = dispatcher(FakeLauncher::new());
        assert_eq!(dispatcher.customer_label(None), "Customer");
        assert_eq!(dispatcher.customer_label(Some("   ")), "Customer");
        assert_eq!(dispatcher.customer_label(Some(" Maria ")), "Maria");
    }
}
