//! Routing of business events to handlers.
//!
//! The supervisor hands every business event to [`Router::route`] in the
//! order the transport emitted it. Each event reaches at most one handler,
//! which runs on its own task; errors and panics stop at this boundary.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use herald_net::{InboundMessage, OutboundMessage, TransportEvent, TransportHandle, UpsertKind};
use herald_shared::{HeraldError, Jid};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::context::AppContext;
use crate::handlers::*;

/// Where a single upserted message goes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MessageRoute {
    Drop(&'static str),
    Status(InboundMessage),
    Business(InboundMessage),
}

/// Normalize one message and decide its path.
pub(crate) fn classify_message(
    mut message: InboundMessage,
    kind: UpsertKind,
    public: bool,
) -> MessageRoute {
    let Some(content) = message.content.take() else {
        return MessageRoute::Drop("no content");
    };
    message.content = Some(content.unwrap_ephemeral());

    if message.key.remote_jid.is_status_broadcast() {
        return MessageRoute::Status(message);
    }
    if message.key.is_self_receipt() {
        return MessageRoute::Drop("self receipt");
    }
    if !public && !message.key.from_me && kind == UpsertKind::Notify {
        return MessageRoute::Drop("private mode");
    }
    MessageRoute::Business(message)
}

pub struct Router {
    ctx: Arc<AppContext>,
    messages: Option<MessageHandler>,
    status: Option<StatusHandler>,
    contacts: Option<ContactsHandler>,
    group_participants: Option<GroupParticipantsHandler>,
    group_metadata: Option<GroupMetadataHandler>,
}

impl Router {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            messages: None,
            status: None,
            contacts: None,
            group_participants: None,
            group_metadata: None,
        }
    }

    pub fn on_message(mut self, handler: impl Handler<MessageEvent> + 'static) -> Self {
        self.messages = Some(Arc::new(handler));
        self
    }

    pub fn on_status(mut self, handler: impl Handler<StatusEvent> + 'static) -> Self {
        self.status = Some(Arc::new(handler));
        self
    }

    pub fn on_contacts(
        mut self,
        handler: impl Handler<Vec<herald_net::ContactUpdate>> + 'static,
    ) -> Self {
        self.contacts = Some(Arc::new(handler));
        self
    }

    pub fn on_group_participants(
        mut self,
        handler: impl Handler<herald_net::GroupParticipantsUpdate> + 'static,
    ) -> Self {
        self.group_participants = Some(Arc::new(handler));
        self
    }

    pub fn on_group_metadata(
        mut self,
        handler: impl Handler<herald_net::GroupMetadata> + 'static,
    ) -> Self {
        self.group_metadata = Some(Arc::new(handler));
        self
    }

    /// Dispatch one transport event. Returns the spawned handler tasks.
    ///
    /// Call, credential and connection events belong to the supervisor and
    /// are ignored here.
    pub fn route(
        &self,
        handle: &Arc<dyn TransportHandle>,
        event: TransportEvent,
    ) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        match event {
            TransportEvent::MessagesUpsert(upsert) => {
                for message in upsert.messages {
                    let id = message.key.id.clone();
                    match classify_message(message, upsert.kind, self.ctx.config.public) {
                        MessageRoute::Drop(reason) => {
                            debug!(id = %id, reason, "message dropped");
                        }
                        MessageRoute::Status(message) => {
                            tasks.extend(self.spawn(
                                "status",
                                &self.status,
                                handle,
                                StatusEvent::Post(message),
                                None,
                            ));
                        }
                        MessageRoute::Business(message) => {
                            handle.clear_retry_cache();
                            let reply_to = Some(message.key.remote_jid.clone());
                            let event = MessageEvent {
                                message,
                                kind: upsert.kind,
                            };
                            tasks.extend(self.spawn(
                                "messages",
                                &self.messages,
                                handle,
                                event,
                                reply_to,
                            ));
                        }
                    }
                }
            }
            TransportEvent::StatusUpdate(update) => {
                tasks.extend(self.spawn(
                    "status",
                    &self.status,
                    handle,
                    StatusEvent::Update(update),
                    None,
                ));
            }
            TransportEvent::Reaction(reaction) => {
                let reply_to = Some(reaction.key.remote_jid.clone());
                tasks.extend(self.spawn(
                    "status",
                    &self.status,
                    handle,
                    StatusEvent::Reaction(reaction),
                    reply_to,
                ));
            }
            TransportEvent::ContactsUpdate(updates) => {
                tasks.extend(self.spawn("contacts", &self.contacts, handle, updates, None));
            }
            TransportEvent::GroupParticipantsUpdate(update) => {
                tasks.extend(self.spawn(
                    "group-participants",
                    &self.group_participants,
                    handle,
                    update,
                    None,
                ));
            }
            TransportEvent::GroupMetadataUpdate(metadata) => {
                tasks.extend(self.spawn(
                    "group-metadata",
                    &self.group_metadata,
                    handle,
                    metadata,
                    None,
                ));
            }
            other @ (TransportEvent::Call(_)
            | TransportEvent::CredsUpdate(_)
            | TransportEvent::ConnectionUpdate(_)) => {
                debug!(kind = other.kind(), "not a business event");
            }
        }

        tasks
    }

    fn spawn<E>(
        &self,
        name: &'static str,
        slot: &Option<Arc<dyn Handler<E>>>,
        handle: &Arc<dyn TransportHandle>,
        event: E,
        reply_to: Option<Jid>,
    ) -> Option<JoinHandle<()>>
    where
        E: Send + 'static,
    {
        let Some(handler) = slot.clone() else {
            debug!(handler = name, "no handler registered");
            return None;
        };
        let handle = Arc::clone(handle);
        let failure_text = self.ctx.failure_text();

        Some(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&handle), event))
                .catch_unwind()
                .await;

            let err = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => HeraldError::Handler {
                    handler: name.to_string(),
                    reason: e.to_string(),
                },
                Err(panic) => HeraldError::Handler {
                    handler: name.to_string(),
                    reason: format!("panicked: {}", panic_message(panic.as_ref())),
                },
            };
            error!(error = %err, kind = ?err.kind(), "handler failed");

            if let Some(conversation) = reply_to {
                if let Err(e) = handle
                    .send_message(&conversation, OutboundMessage::text(failure_text))
                    .await
                {
                    warn!(conversation = %conversation, error = %e, "could not report handler failure");
                }
            }
        }))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use herald_net::{
        ConnectOptions, Credentials, LoopbackController, LoopbackTransport, MessageContent,
        MessagesUpsert, ReactionEvent, Transport,
    };
    use herald_shared::MessageKey;

    use crate::config::SessionConfig;

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    fn text_message(chat: &str, id: &str, from_me: bool, content: MessageContent) -> InboundMessage {
        InboundMessage {
            key: MessageKey {
                remote_jid: jid(chat),
                id: id.to_string(),
                from_me,
                participant: None,
            },
            push_name: Some("Ana".into()),
            timestamp: Utc::now(),
            content: Some(content),
        }
    }

    fn text(t: &str) -> MessageContent {
        MessageContent::Text { text: t.into() }
    }

    fn upsert(messages: Vec<InboundMessage>) -> TransportEvent {
        TransportEvent::MessagesUpsert(MessagesUpsert {
            messages,
            kind: UpsertKind::Notify,
        })
    }

    async fn session() -> (Arc<dyn TransportHandle>, LoopbackController) {
        let (transport, controller) = LoopbackTransport::new(jid("100@s.whatsapp.net"));
        let conn = transport
            .connect(&Credentials::empty(), &ConnectOptions::default())
            .await
            .unwrap();
        (conn.handle, controller)
    }

    fn ctx(public: bool) -> Arc<AppContext> {
        let config = SessionConfig {
            public,
            ..SessionConfig::default()
        };
        Arc::new(AppContext::from_config(config).unwrap())
    }

    async fn join(tasks: Vec<JoinHandle<()>>) {
        for task in tasks {
            task.await.unwrap();
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler<MessageEvent> for Failing {
        async fn handle(&self, _: Arc<dyn TransportHandle>, _: MessageEvent) -> Result<(), HeraldError> {
            Err(HeraldError::Connection("backend down".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Handler<MessageEvent> for Panicking {
        async fn handle(&self, _: Arc<dyn TransportHandle>, event: MessageEvent) -> Result<(), HeraldError> {
            if event.text() == Some("boom") {
                panic!("handler exploded");
            }
            Ok(())
        }
    }

    #[test]
    fn test_classify_unwraps_ephemeral() {
        let wrapped = MessageContent::Ephemeral {
            message: Box::new(text("hi")),
        };
        let route = classify_message(
            text_message("1@s.whatsapp.net", "M1", false, wrapped),
            UpsertKind::Notify,
            true,
        );
        match route {
            MessageRoute::Business(message) => assert_eq!(message.content, Some(text("hi"))),
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_classify_filters() {
        let status = text_message("status@broadcast", "S1", false, text("story"));
        assert!(matches!(
            classify_message(status, UpsertKind::Notify, true),
            MessageRoute::Status(_)
        ));

        let receipt = text_message("1@s.whatsapp.net", "BAE5ABCDEF012345", true, text("x"));
        assert_eq!(
            classify_message(receipt, UpsertKind::Notify, true),
            MessageRoute::Drop("self receipt")
        );

        let stranger = text_message("1@s.whatsapp.net", "M2", false, text("hello"));
        assert_eq!(
            classify_message(stranger.clone(), UpsertKind::Notify, false),
            MessageRoute::Drop("private mode")
        );
        assert!(matches!(
            classify_message(stranger, UpsertKind::Append, false),
            MessageRoute::Business(_)
        ));

        let own = text_message("1@s.whatsapp.net", "M3", true, text(".ping"));
        assert!(matches!(
            classify_message(own, UpsertKind::Notify, false),
            MessageRoute::Business(_)
        ));

        let mut stub = text_message("1@s.whatsapp.net", "M4", false, text(""));
        stub.content = None;
        assert_eq!(
            classify_message(stub, UpsertKind::Notify, true),
            MessageRoute::Drop("no content")
        );
    }

    #[tokio::test]
    async fn test_messages_reach_channel_handler() {
        let (handle, controller) = session().await;
        let (channel, mut rx) = ChannelHandler::<MessageEvent>::new(8);
        let router = Router::new(ctx(true)).on_message(channel);

        let tasks = router.route(
            &handle,
            upsert(vec![
                text_message("1@s.whatsapp.net", "M1", false, text("one")),
                text_message("1@s.whatsapp.net", "BAE5ABCDEF012345", true, text("receipt")),
                text_message("2@s.whatsapp.net", "M2", false, text("two")),
            ]),
        );
        join(tasks).await;

        let mut seen = vec![
            rx.recv().await.unwrap().event.text().map(str::to_owned),
            rx.recv().await.unwrap().event.text().map(str::to_owned),
        ];
        seen.sort();
        assert_eq!(seen, vec![Some("one".to_string()), Some("two".to_string())]);
        assert!(rx.try_recv().is_err());
        assert_eq!(controller.retry_cache_clears(), 2);
    }

    #[tokio::test]
    async fn test_status_path_gets_posts_and_reactions() {
        let (handle, _controller) = session().await;
        let (messages, mut message_rx) = ChannelHandler::<MessageEvent>::new(8);
        let (status, mut status_rx) = ChannelHandler::<StatusEvent>::new(8);
        let router = Router::new(ctx(true)).on_message(messages).on_status(status);

        let mut tasks = router.route(
            &handle,
            upsert(vec![text_message("status@broadcast", "S1", false, text("story"))]),
        );
        tasks.extend(router.route(
            &handle,
            TransportEvent::Reaction(ReactionEvent {
                key: MessageKey {
                    remote_jid: jid("1@s.whatsapp.net"),
                    id: "M1".into(),
                    from_me: true,
                    participant: None,
                },
                from: jid("1@s.whatsapp.net"),
                emoji: Some("👍".into()),
            }),
        ));
        join(tasks).await;

        let first = status_rx.recv().await.unwrap().event;
        let second = status_rx.recv().await.unwrap().event;
        let posts = [&first, &second]
            .iter()
            .filter(|e| matches!(e, StatusEvent::Post(_)))
            .count();
        let reactions = [&first, &second]
            .iter()
            .filter(|e| matches!(e, StatusEvent::Reaction(_)))
            .count();
        assert_eq!((posts, reactions), (1, 1));
        assert!(message_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handler_error_reports_to_conversation() {
        let (handle, controller) = session().await;
        let router = Router::new(ctx(true)).on_message(Failing);

        let tasks = router.route(
            &handle,
            upsert(vec![text_message("1@s.whatsapp.net", "M1", false, text("hi"))]),
        );
        join(tasks).await;

        let sent = controller.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, jid("1@s.whatsapp.net"));
        assert!(sent[0].message.text.contains("could not process"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let (handle, controller) = session().await;
        let router = Router::new(ctx(true)).on_message(Panicking);

        let tasks = router.route(
            &handle,
            upsert(vec![
                text_message("1@s.whatsapp.net", "M1", false, text("boom")),
                text_message("2@s.whatsapp.net", "M2", false, text("fine")),
            ]),
        );
        join(tasks).await;

        let sent = controller.take_sent();
        assert_eq!(sent.len(), 1, "only the panicking conversation hears about it");
        assert_eq!(sent[0].to, jid("1@s.whatsapp.net"));
    }
}
