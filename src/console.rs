//! Relays console output of the page to the local process.
//!
//! Every message resolves its arguments as soon as it arrives, so slow
//! lookups of different messages overlap. Printing is chained: a message
//! prints only after the message emitted before it has printed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use serde_json::{Number, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::browser::{RemoteArg, RemotePage};
use crate::Result;

/// Local output stream a console line goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Destination of relayed console lines.
pub trait ConsoleSink: Send + Sync + 'static {
    fn write_line(&self, stream: Stream, line: &str);
}

/// Writes to the process stdout/stderr.
pub struct StdioSink;

impl ConsoleSink for StdioSink {
    fn write_line(&self, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => println!("{line}"),
            Stream::Stderr => eprintln!("{line}"),
        }
    }
}

/// Console methods that are relayed. Anything else (including `clear`) is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleKind {
    Log,
    Debug,
    Info,
    Error,
    Warning,
    Dir,
    DirXml,
    Table,
    Trace,
    Assert,
    Count,
    TimeEnd,
    Profile,
    ProfileEnd,
    StartGroup,
    StartGroupCollapsed,
    EndGroup,
}

impl ConsoleKind {
    pub fn parse(kind: &str) -> Option<Self> {
        let kind = match kind {
            "log" => ConsoleKind::Log,
            "debug" => ConsoleKind::Debug,
            "info" => ConsoleKind::Info,
            "error" => ConsoleKind::Error,
            "warning" => ConsoleKind::Warning,
            "dir" => ConsoleKind::Dir,
            "dirxml" => ConsoleKind::DirXml,
            "table" => ConsoleKind::Table,
            "trace" => ConsoleKind::Trace,
            "assert" => ConsoleKind::Assert,
            "count" => ConsoleKind::Count,
            "timeEnd" => ConsoleKind::TimeEnd,
            "profile" => ConsoleKind::Profile,
            "profileEnd" => ConsoleKind::ProfileEnd,
            "startGroup" => ConsoleKind::StartGroup,
            "startGroupCollapsed" => ConsoleKind::StartGroupCollapsed,
            "endGroup" => ConsoleKind::EndGroup,
            _ => return None,
        };
        Some(kind)
    }

    pub fn stream(self) -> Stream {
        match self {
            ConsoleKind::Error | ConsoleKind::Warning | ConsoleKind::Assert | ConsoleKind::Trace => {
                Stream::Stderr
            }
            _ => Stream::Stdout,
        }
    }
}

/// Time given to messages already sent by the page to reach the relay.
const SETTLE_GRACE: Duration = Duration::from_millis(100);

/// Completion of one message's print. Each link awaits the previous one.
type Link = Shared<BoxFuture<'static, ()>>;

fn completed_link() -> Link {
    future::ready(()).boxed().shared()
}

/// Handle of an attached relay.
pub struct ConsoleRelay {
    tail: watch::Receiver<Link>,
    listeners: Vec<JoinHandle<()>>,
}

impl ConsoleRelay {
    /// Subscribe to the page's console and dialogs.
    ///
    /// Console messages are printed to `sink` in emission order; dialogs are
    /// dismissed as soon as they open.
    pub async fn attach(page: Arc<dyn RemotePage>, sink: Arc<dyn ConsoleSink>) -> Result<Self> {
        let mut messages = page.console_messages().await?;
        let mut dialogs = page.dialogs().await?;
        let (tail_tx, tail) = watch::channel(completed_link());
        let groups = Arc::new(AtomicUsize::new(0));

        let console_page = Arc::clone(&page);
        let console = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                let Some(kind) = ConsoleKind::parse(&message.kind) else {
                    tracing::trace!("Dropping console message of kind {}", message.kind);
                    continue;
                };
                let previous = tail_tx.borrow().clone();
                let link = relay_message(
                    Arc::clone(&console_page),
                    Arc::clone(&sink),
                    Arc::clone(&groups),
                    kind,
                    message.args,
                    previous,
                )
                .boxed()
                .shared();
                tokio::spawn(link.clone());
                tail_tx.send_modify(|tail| *tail = link);
            }
        });

        let dialog = tokio::spawn(async move {
            while let Some(message) = dialogs.next().await {
                tracing::debug!("Dismissing dialog: {}", message);
                if let Err(e) = page.dismiss_dialog().await {
                    tracing::warn!("Failed to dismiss dialog: {}", e);
                }
            }
        });

        Ok(Self { tail, listeners: vec![console, dialog] })
    }

    /// Wait until every message received so far has been printed.
    pub async fn settle(&self) {
        tokio::time::sleep(SETTLE_GRACE).await;
        let tail = self.tail.borrow().clone();
        tail.await;
    }

    /// Stop listening. Messages already received still print.
    pub fn detach(self) {
        for listener in self.listeners {
            listener.abort();
        }
    }
}

async fn relay_message(
    page: Arc<dyn RemotePage>,
    sink: Arc<dyn ConsoleSink>,
    groups: Arc<AtomicUsize>,
    kind: ConsoleKind,
    args: Vec<RemoteArg>,
    previous: Link,
) {
    let resolved = resolve_args(page.as_ref(), &args).await;
    previous.await;
    match resolved {
        Ok(values) => print_message(sink.as_ref(), &groups, kind, &values),
        Err(e) => tracing::warn!("Failed to relay console message: {}", e),
    }
}

async fn resolve_args(page: &dyn RemotePage, args: &[RemoteArg]) -> Result<Vec<Value>> {
    future::try_join_all(args.iter().map(|arg| async move {
        match arg {
            RemoteArg::Inline(value) => Ok(value.clone()),
            RemoteArg::Error { description } => Ok(Value::String(description.clone())),
            RemoteArg::Handle { object_id } => page.fetch_value(object_id).await,
        }
    }))
    .await
}

fn print_message(sink: &dyn ConsoleSink, groups: &AtomicUsize, kind: ConsoleKind, values: &[Value]) {
    let depth = groups.load(Ordering::SeqCst);
    let text = match kind {
        ConsoleKind::EndGroup => {
            let _ = groups.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
            return;
        }
        ConsoleKind::StartGroup | ConsoleKind::StartGroupCollapsed => {
            groups.fetch_add(1, Ordering::SeqCst);
            format_values(values)
        }
        ConsoleKind::Trace => format!("Trace: {}", format_values(values)),
        ConsoleKind::Assert if values.is_empty() => "Assertion failed".to_string(),
        ConsoleKind::Assert => format!("Assertion failed: {}", format_values(values)),
        _ => format_values(values),
    };

    let indent = "  ".repeat(depth);
    for line in text.split('\n') {
        sink.write_line(kind.stream(), &format!("{indent}{line}"));
    }
}

/// Format console arguments like Node's `util.format`: a leading string may
/// carry `%s`/`%d`/`%i`/`%f`/`%j`/`%o`/`%O`/`%c` placeholders, remaining
/// values are appended separated by spaces.
pub fn format_values(values: &[Value]) -> String {
    let mut rest = values.iter();
    let mut parts = Vec::new();

    if let Some(Value::String(template)) = values.first() {
        rest.next();
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek().copied() {
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                Some(spec @ ('s' | 'd' | 'i' | 'f' | 'j' | 'o' | 'O' | 'c')) => {
                    chars.next();
                    match rest.next() {
                        Some(value) => out.push_str(&substitute(spec, value)),
                        None => {
                            out.push('%');
                            out.push(spec);
                        }
                    }
                }
                _ => out.push('%'),
            }
        }
        parts.push(out);
    }

    parts.extend(rest.map(display));
    parts.join(" ")
}

fn substitute(spec: char, value: &Value) -> String {
    match spec {
        's' => display(value),
        'd' | 'i' | 'f' => {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            };
            match number {
                Some(n) if spec == 'i' => format!("{}", n.trunc() as i64),
                Some(n) => float_text(n),
                None => "NaN".to_string(),
            }
        }
        'c' => String::new(),
        _ => value.to_string(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_text(n),
        other => other.to_string(),
    }
}

fn number_text(n: &Number) -> String {
    if n.is_f64() {
        n.as_f64().map(float_text).unwrap_or_else(|| n.to_string())
    } else {
        n.to_string()
    }
}

fn float_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
