//! End-to-end conversations between a client and a server session.
//!
//! Both sessions run over an in-memory connection and are pumped in turn
//! until they go quiet, so every exchange is checked from both sides.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use mailwire_smtp::client::{self, ClientContext, DeliveryHandler, DeliveryRequest, DeliveryResult};
use mailwire_smtp::io::memory;
use mailwire_smtp::server::{self, ContentSink, Envelope, MailHandler, ServerContext};
use mailwire_smtp::{
    Address, ClientConfig, EnhancedCode, Extension, Reply, ReplyCode, ReplyFuture, ReplyPromise,
    ReversePath, ServerConfig, Session,
};

#[derive(Default)]
struct Outbox {
    queue: VecDeque<DeliveryRequest>,
    completed: Vec<DeliveryResult>,
    failed: Vec<DeliveryResult>,
}

#[derive(Clone, Default)]
struct Sender(Arc<Mutex<Outbox>>);

impl DeliveryHandler for Sender {
    fn submit_request(&mut self) -> Option<DeliveryRequest> {
        self.0.lock().unwrap().queue.pop_front()
    }

    fn completed(&mut self, _: DeliveryRequest, result: DeliveryResult) {
        self.0.lock().unwrap().completed.push(result);
    }

    fn failed(&mut self, _: DeliveryRequest, result: DeliveryResult) {
        self.0.lock().unwrap().failed.push(result);
    }
}

#[derive(Default)]
struct Mailbox {
    messages: Vec<(Envelope, Vec<u8>)>,
    promises: Vec<ReplyPromise>,
}

struct Store {
    mailbox: Arc<Mutex<Mailbox>>,
}

struct Capture {
    envelope: Envelope,
    content: Vec<u8>,
    mailbox: Arc<Mutex<Mailbox>>,
}

impl ContentSink for Capture {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.content.extend_from_slice(data);
        Ok(())
    }

    fn finalize(&mut self) -> io::Result<()> {
        let content = std::mem::take(&mut self.content);
        self.mailbox
            .lock()
            .unwrap()
            .messages
            .push((self.envelope.clone(), content));
        Ok(())
    }
}

impl MailHandler for Store {
    fn validate_sender(&self, sender: &ReversePath) -> ReplyFuture {
        if sender.to_string().contains("spammer") {
            return ReplyFuture::ready(Reply::enhanced(
                ReplyCode::MAILBOX_NAME_INVALID,
                EnhancedCode::BAD_SENDER,
                "Sender rejected",
            ));
        }
        ReplyFuture::ready(Reply::enhanced(ReplyCode::OK, EnhancedCode::SENDER_OK, "OK"))
    }

    fn validate_recipient(&self, recipient: &Address) -> ReplyFuture {
        let local = recipient.as_str();
        if local.starts_with("unknown") {
            return ReplyFuture::ready(Reply::enhanced(
                ReplyCode::MAILBOX_UNAVAILABLE,
                EnhancedCode::BAD_DESTINATION,
                format!("{local}: no such user"),
            ));
        }
        if local.starts_with("slow") {
            let (future, promise) = ReplyFuture::pending();
            self.mailbox.lock().unwrap().promises.push(promise);
            return future;
        }
        ReplyFuture::ready(Reply::enhanced(ReplyCode::OK, EnhancedCode::RECIPIENT_OK, "OK"))
    }

    fn open_sink(&self, envelope: &Envelope) -> io::Result<Box<dyn ContentSink>> {
        Ok(Box::new(Capture {
            envelope: envelope.clone(),
            content: Vec::new(),
            mailbox: Arc::clone(&self.mailbox),
        }))
    }

    fn deliver(&self, _: &Envelope) -> ReplyFuture {
        ReplyFuture::ready(server::message_accepted())
    }
}

struct Conversation {
    client: Session<ClientContext>,
    server: Session<ServerContext>,
    outbox: Arc<Mutex<Outbox>>,
    mailbox: Arc<Mutex<Mailbox>>,
}

impl Conversation {
    fn new(client_config: ClientConfig, server_config: ServerConfig, requests: Vec<DeliveryRequest>) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let (client_end, server_end) = memory::pair();
        let sender = Sender::default();
        sender.0.lock().unwrap().queue.extend(requests);
        let outbox = Arc::clone(&sender.0);
        let mailbox = Arc::new(Mutex::new(Mailbox::default()));

        let client = Session::new(
            Box::new(client_end.with_chunk_size(7)),
            ClientContext::new(Arc::new(client_config), sender),
            client::codecs(),
        );
        let server = Session::new(
            Box::new(server_end),
            ServerContext::new(
                Arc::new(server_config),
                Arc::new(Store {
                    mailbox: Arc::clone(&mailbox),
                }),
            ),
            server::codecs(),
        );
        let mut conversation = Self {
            client,
            server,
            outbox,
            mailbox,
        };
        conversation.server.connect().unwrap();
        conversation.client.connect().unwrap();
        conversation
    }

    /// Pumps both sides until nothing changes any more.
    fn settle(&mut self) {
        for _ in 0..500 {
            if self.client.is_closed() && self.server.is_closed() {
                return;
            }
            self.server.on_readable().unwrap();
            self.client.on_readable().unwrap();
            self.server.on_writable().unwrap();
            self.client.on_writable().unwrap();
        }
    }

    /// Lets the client quit once its queue is empty.
    fn finish(&mut self) {
        self.settle();
        self.client.handle().terminate();
        self.settle();
        assert!(self.client.is_closed());
        assert!(self.server.is_closed());
    }
}

fn sender(addr: &str) -> ReversePath {
    ReversePath::Mailbox(Address::new(addr).unwrap())
}

fn request(from: &str, to: &[&str], content: &[u8]) -> DeliveryRequest {
    DeliveryRequest::from_bytes(
        sender(from),
        to.iter().map(|r| Address::new(*r).unwrap()).collect(),
        content.to_vec(),
    )
}

#[test]
fn test_content_arrives_verbatim() {
    let content = b"Subject: dots\r\n\r\n.leading\r\n..double\r\n.\r\nmiddle\r\n";
    let mut conversation = Conversation::new(
        ClientConfig::default(),
        ServerConfig::default(),
        vec![request("a@example.com", &["b@example.com"], content)],
    );
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    assert_eq!(outbox.completed.len(), 1);
    assert_eq!(outbox.completed[0].reply.code, ReplyCode::OK);
    let mailbox = conversation.mailbox.lock().unwrap();
    let (envelope, received) = &mailbox.messages[0];
    assert_eq!(received.as_slice(), content.as_slice());
    assert_eq!(envelope.client.as_deref(), Some("localhost"));
}

#[test]
fn test_refused_recipients_in_order() {
    let mut conversation = Conversation::new(
        ClientConfig::default(),
        ServerConfig::default(),
        vec![request(
            "a@example.com",
            &[
                "one@example.com",
                "unknown1@example.com",
                "two@example.com",
                "unknown2@example.com",
            ],
            b"hello\r\n",
        )],
    );
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    let result = &outbox.completed[0];
    let refused: Vec<_> = result.failures.iter().map(|f| f.recipient.as_str()).collect();
    assert_eq!(refused, vec!["unknown1@example.com", "unknown2@example.com"]);
    assert!(result.failures[0].reply.text().starts_with("unknown1@example.com"));
    assert!(result.failures[1].reply.text().starts_with("unknown2@example.com"));

    let mailbox = conversation.mailbox.lock().unwrap();
    let recipients: Vec<_> = mailbox.messages[0]
        .0
        .recipients
        .iter()
        .map(Address::as_str)
        .collect();
    assert_eq!(recipients, vec!["one@example.com", "two@example.com"]);
}

#[test]
fn test_all_refused_then_next_message() {
    let mut conversation = Conversation::new(
        ClientConfig::default(),
        ServerConfig::default(),
        vec![
            request("a@example.com", &["unknown@example.com"], b"lost\r\n"),
            request("a@example.com", &["c@example.com"], b"kept\r\n"),
        ],
    );
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    assert_eq!(outbox.failed.len(), 1);
    assert_eq!(outbox.failed[0].reply.code, ReplyCode::TRANSACTION_FAILED);
    assert_eq!(outbox.failed[0].failures.len(), 1);
    assert_eq!(outbox.completed.len(), 1);

    let mailbox = conversation.mailbox.lock().unwrap();
    assert_eq!(mailbox.messages.len(), 1);
    assert_eq!(mailbox.messages[0].1, b"kept\r\n");
}

#[test]
fn test_rejected_sender_fails_every_recipient() {
    let mut conversation = Conversation::new(
        ClientConfig::default(),
        ServerConfig::default(),
        vec![request(
            "spammer@example.com",
            &["a@example.com", "b@example.com"],
            b"buy now\r\n",
        )],
    );
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    let result = &outbox.failed[0];
    assert_eq!(result.reply.code, ReplyCode::BAD_SEQUENCE);
    assert_eq!(result.reply.enhanced, Some(EnhancedCode::INVALID_COMMAND));
    assert_eq!(result.failures.len(), 2);
    assert!(
        result
            .failures
            .iter()
            .all(|f| f.reply.code == ReplyCode::BAD_SEQUENCE)
    );
    assert!(conversation.mailbox.lock().unwrap().messages.is_empty());
}

#[test]
fn test_slow_validation_keeps_order() {
    let mut conversation = Conversation::new(
        ClientConfig::default(),
        ServerConfig::default(),
        vec![request(
            "a@example.com",
            &["slow@example.com", "unknown@example.com", "b@example.com"],
            b"patience\r\n",
        )],
    );
    conversation.settle();
    assert!(conversation.outbox.lock().unwrap().completed.is_empty());
    assert!(!conversation.client.is_closed());

    let promise = conversation.mailbox.lock().unwrap().promises.pop().unwrap();
    promise.complete(Reply::enhanced(
        ReplyCode::MAILBOX_BUSY,
        EnhancedCode::new(4, 2, 1),
        "slow: mailbox busy",
    ));
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    let result = &outbox.completed[0];
    let refused: Vec<_> = result
        .failures
        .iter()
        .map(|f| (f.recipient.as_str(), f.reply.code))
        .collect();
    assert_eq!(
        refused,
        vec![
            ("slow@example.com", ReplyCode::MAILBOX_BUSY),
            ("unknown@example.com", ReplyCode::MAILBOX_UNAVAILABLE),
        ]
    );
}

#[test]
fn test_lmtp_reply_per_recipient() {
    let mut conversation = Conversation::new(
        ClientConfig::builder().lmtp(true).build(),
        ServerConfig::builder().lmtp(true).build(),
        vec![request(
            "a@example.com",
            &["x@example.com", "unknown@example.com", "y@example.com"],
            b"local delivery\r\n",
        )],
    );
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    let result = &outbox.completed[0];
    assert_eq!(result.reply.code, ReplyCode::OK);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(conversation.mailbox.lock().unwrap().messages.len(), 1);
}

#[test]
fn test_without_pipelining() {
    let server_config = ServerConfig::builder()
        .extensions([Extension::EnhancedStatusCodes])
        .build();
    let mut conversation = Conversation::new(
        ClientConfig::default(),
        server_config,
        vec![request(
            "a@example.com",
            &["unknown@example.com", "b@example.com"],
            b"one at a time\r\n",
        )],
    );
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    assert_eq!(outbox.completed.len(), 1);
    assert_eq!(outbox.completed[0].failures.len(), 1);
}

#[test]
fn test_declared_size_over_limit() {
    let mut conversation = Conversation::new(
        ClientConfig::default(),
        ServerConfig::builder().max_message_size(64).build(),
        vec![request("a@example.com", &["b@example.com"], &[b'x'; 200])],
    );
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    let result = &outbox.failed[0];
    assert_eq!(result.reply.code, ReplyCode::BAD_SEQUENCE);
    assert_eq!(result.failures[0].recipient.as_str(), "b@example.com");
    assert!(conversation.mailbox.lock().unwrap().messages.is_empty());
}

#[test]
fn test_oversized_message_refused() {
    let mut conversation = Conversation::new(
        ClientConfig::default(),
        ServerConfig::builder().max_message_size(64).build(),
        vec![DeliveryRequest::new(
            sender("a@example.com"),
            vec![Address::new("b@example.com").unwrap()],
            io::Cursor::new(vec![b'x'; 200]),
        )],
    );
    conversation.finish();

    let outbox = conversation.outbox.lock().unwrap();
    assert_eq!(outbox.failed[0].reply.code, ReplyCode::EXCEEDED_STORAGE);
    assert!(conversation.mailbox.lock().unwrap().messages.is_empty());
}
