//! Send-rate limiting through the public client and merge APIs.
//! Time is driven by `MockClock`; nothing here sleeps or opens a socket.

use async_trait::async_trait;
use mailmerge_channels::{
    database::read_rows, run_merge, MergeOptions, SendOutcome, SendmailClient, Transport,
};
use mailmerge_core::clock::mock::MockClock;
use mailmerge_core::{MailmergeError, MailmergeResult, Message, MessageTemplate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Records every delivery; can be switched to fail.
#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<(String, Vec<String>, Vec<u8>)>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(
        &self,
        sender: &str,
        recipients: &[String],
        message: &[u8],
    ) -> MailmergeResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailmergeError::Smtp {
                code: 421,
                message: "service not available".to_string(),
            });
        }
        self.delivered.lock().unwrap().push((
            sender.to_string(),
            recipients.to_vec(),
            message.to_vec(),
        ));
        Ok(())
    }
}

fn sample_message() -> Message {
    Message::parse(
        "TO: to@test.com\nSUBJECT: Testing mailmerge\nFROM: from@test.com\n\nHello world\n",
    )
    .unwrap()
}

fn client(
    ratelimit: Option<u32>,
    dry_run: bool,
) -> (SendmailClient<RecordingTransport, MockClock>, MockClock) {
    let clock = MockClock::default();
    let client = SendmailClient::with_clock(
        RecordingTransport::default(),
        ratelimit,
        dry_run,
        clock.clone(),
    );
    (client, clock)
}

async fn send(client: &mut SendmailClient<RecordingTransport, MockClock>) -> i32 {
    let recipients = vec!["to@test.com".to_string()];
    client
        .send("from@test.com", &recipients, &sample_message())
        .await
        .unwrap()
        .code()
}

#[tokio::test]
async fn test_sixty_per_minute_retry_after_one_second() {
    let (mut client, clock) = client(Some(60), false);

    assert_eq!(send(&mut client).await, 0);
    assert_eq!(send(&mut client).await, 1);

    clock.advance(Duration::from_millis(1100));
    assert_eq!(send(&mut client).await, 0);

    let delivered = client.transport().delivered.lock().unwrap();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].0, "from@test.com");
    assert_eq!(delivered[0].1, vec!["to@test.com".to_string()]);
    assert!(String::from_utf8_lossy(&delivered[0].2).contains("Hello world\r\n"));
}

#[tokio::test]
async fn test_back_to_back_sends_for_various_limits() {
    for limit in [1, 2, 30, 60, 600, 6000] {
        let (mut client, clock) = client(Some(limit), false);
        assert_eq!(send(&mut client).await, 0, "limit {limit}");
        assert_eq!(send(&mut client).await, 1, "limit {limit}");

        clock.advance(Duration::from_secs(60) / limit);
        assert_eq!(send(&mut client).await, 0, "limit {limit}");
    }
}

#[tokio::test]
async fn test_unlimited_allows_every_send() {
    for ratelimit in [None, Some(0)] {
        let (mut client, _) = client(ratelimit, false);
        for _ in 0..25 {
            assert_eq!(send(&mut client).await, 0);
        }
        assert_eq!(client.transport().count(), 25);
    }
}

#[tokio::test]
async fn test_throttled_attempt_does_not_move_last_send() {
    let (mut client, clock) = client(Some(1), false);

    assert_eq!(send(&mut client).await, 0);
    let first = client.limiter().last_send();

    clock.advance(Duration::from_secs(40));
    assert_eq!(send(&mut client).await, 1);
    assert_eq!(client.limiter().last_send(), first);

    // 60s after the first send, 20s after the throttled one.
    clock.advance(Duration::from_secs(20));
    assert_eq!(send(&mut client).await, 0);
    assert_ne!(client.limiter().last_send(), first);
}

#[tokio::test]
async fn test_rate_limited_outcome_reports_retry_after() {
    let (mut client, clock) = client(Some(2), false);
    assert_eq!(send(&mut client).await, 0);
    clock.advance(Duration::from_secs(10));

    let outcome = client
        .send("from@test.com", &["to@test.com".to_string()], &sample_message())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SendOutcome::RateLimited {
            limit: 2,
            retry_after: Duration::from_secs(20),
        }
    );
}

#[tokio::test]
async fn test_transport_failure_propagates_without_stamping() {
    let (mut client, _) = client(Some(60), false);
    client.transport().fail.store(true, Ordering::SeqCst);

    let err = client
        .send("from@test.com", &["to@test.com".to_string()], &sample_message())
        .await
        .unwrap_err();
    assert!(matches!(err, MailmergeError::Smtp { code: 421, .. }));
    assert!(client.limiter().last_send().is_none());

    // The failed attempt did not consume the slot.
    client.transport().fail.store(false, Ordering::SeqCst);
    assert_eq!(send(&mut client).await, 0);
}

#[tokio::test]
async fn test_dry_run_is_throttled_without_transport_io() {
    let (mut client, clock) = client(Some(60), true);

    assert_eq!(send(&mut client).await, 0);
    assert_eq!(send(&mut client).await, 1);
    clock.advance(Duration::from_secs(1));
    assert_eq!(send(&mut client).await, 0);

    assert_eq!(client.transport().count(), 0);
}

const TEMPLATE: &str = "TO: {{email}}\nFROM: from@test.com\n\nHello world\n";
const DATABASE: &str = "email\none@test.com\ntwo@test.com\n";

#[tokio::test]
async fn test_merge_dry_run_hits_rate_limit_and_continues() {
    let (mut client, _) = client(Some(1), true);
    let template = MessageTemplate::new(TEMPLATE);
    let rows = read_rows(DATABASE.as_bytes()).unwrap();
    let mut out = Vec::new();

    let summary = run_merge(
        &mut client,
        &template,
        &rows,
        &MergeOptions::default(),
        &mut out,
    )
    .await
    .unwrap();

    let output = String::from_utf8(out).unwrap();
    assert!(output.contains(">>> message 1 sent"));
    assert!(output.contains("Rate limit of 1 message per minute hit"));
    assert!(output.contains(">>> message 2 not sent"));
    assert!(output.contains("This was a dry run"));
    assert!(output.contains("TO: two@test.com"));

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.rate_limited, 1);
    assert!(!summary.limit_reached);
    assert_eq!(client.transport().count(), 0);
}

#[tokio::test]
async fn test_merge_sends_when_time_allows() {
    let (mut client, _) = client(None, false);
    let template = MessageTemplate::new(TEMPLATE);
    let rows = read_rows(DATABASE.as_bytes()).unwrap();
    let mut out = Vec::new();

    let summary = run_merge(
        &mut client,
        &template,
        &rows,
        &MergeOptions::default(),
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(summary.sent, 2);
    let output = String::from_utf8(out).unwrap();
    assert!(output.contains(">>> message 2 sent"));
    assert!(!output.contains("dry run"));

    let delivered = client.transport().delivered.lock().unwrap();
    assert_eq!(delivered[0].1, vec!["one@test.com".to_string()]);
    assert_eq!(delivered[1].1, vec!["two@test.com".to_string()]);
}

#[tokio::test]
async fn test_merge_limit_and_resume() {
    let (mut client, _) = client(None, true);
    let template = MessageTemplate::new(TEMPLATE);
    let rows = read_rows("email\na@test.com\nb@test.com\nc@test.com\n".as_bytes()).unwrap();
    let mut out = Vec::new();

    let options = MergeOptions {
        limit: Some(1),
        resume: 2,
    };
    let summary = run_merge(&mut client, &template, &rows, &options, &mut out)
        .await
        .unwrap();

    let output = String::from_utf8(out).unwrap();
    assert!(output.contains(">>> message 2 sent"));
    assert!(output.contains("TO: b@test.com"));
    assert!(!output.contains(">>> message 1"));
    assert!(!output.contains(">>> message 3"));
    assert!(output.contains("Limit was 1 message.  To remove the limit, use the --no-limit option."));
    assert_eq!(summary.processed, 1);
    assert!(summary.limit_reached);
}

#[tokio::test]
async fn test_merge_aborts_on_transport_error() {
    let (mut client, _) = client(None, false);
    client.transport().fail.store(true, Ordering::SeqCst);
    let template = MessageTemplate::new(TEMPLATE);
    let rows = read_rows(DATABASE.as_bytes()).unwrap();
    let mut out = Vec::new();

    let err = run_merge(
        &mut client,
        &template,
        &rows,
        &MergeOptions::default(),
        &mut out,
    )
    .await
    .unwrap_err();
    assert!(err.is_transport());

    let output = String::from_utf8(out).unwrap();
    assert!(output.contains(">>> message 1\n"));
    assert!(!output.contains(">>> message 2"));
}
