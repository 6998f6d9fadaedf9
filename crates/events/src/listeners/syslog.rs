//! UDP syslog receiver tuned for Proxmox daemon output.

use super::ListenerTask;
use async_trait::async_trait;
use proxbridge_common::config::SyslogListenerConfig;
use proxbridge_common::{BridgeError, Event, EventSink, Listener, Result, Severity};
use regex::Regex;
use std::net::SocketAddr;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// RFC 3164 frame: priority, optional timestamp, hostname, tag, message.
static SYSLOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^<(\d{1,3})>(?:[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+)?(\S+)\s+([^:\[\s]+)(?:\[\d+\])?:\s*(.*)$",
    )
    .unwrap()
});

/// Proxmox worker completion line, e.g. `... end task UPID:pve1:... some status`.
static TASK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"end task (UPID:\S+)\s+(.+)$").unwrap());

struct BodyPattern {
    re: Regex,
    title: &'static str,
    severity: Severity,
}

/// Proxmox daemon messages worth a dedicated title, checked in order.
static BODY_PATTERNS: LazyLock<Vec<BodyPattern>> = LazyLock::new(|| {
    let pattern = |re: &str, title: &'static str, severity: Severity| BodyPattern {
        re: Regex::new(re).unwrap(),
        title,
        severity,
    };
    vec![
        pattern(r"(?i)out of memory|oom-kill", "Out of memory", Severity::Critical),
        pattern(r"(?i)fenc(?:ing|ed) node|self-fence", "Node fence", Severity::Critical),
        pattern(r"(?i)lost quorum|quorum lost", "Quorum lost", Severity::Critical),
        pattern(
            r"(?i)node \S+ (?:joined|left)|new node .* joined",
            "Cluster membership change",
            Severity::Warning,
        ),
        pattern(
            r"(?i)migration (?:.*\b)?(?:failed|aborted)",
            "VM migration failed",
            Severity::Error,
        ),
        pattern(
            r"(?i)migration (?:.*\b)?(?:started|finished|completed)",
            "VM migration",
            Severity::Info,
        ),
        pattern(
            r"(?i)backup (?:.*\b)?(?:failed|error)|vzdump.*(?:failed|error)",
            "Backup failed",
            Severity::Error,
        ),
        pattern(
            r"(?i)starting backup|backup finished|finished backup",
            "Backup",
            Severity::Info,
        ),
        pattern(
            r"(?i)storage \S+ (?:is )?(?:offline|unavailable|not online)|storage error",
            "Storage problem",
            Severity::Error,
        ),
        pattern(r"(?i)start VM \d+|stop VM \d+", "VM power change", Severity::Info),
    ]
});

fn severity_for_pri(pri: u32) -> Severity {
    match pri & 7 {
        0..=2 => Severity::Critical,
        3 => Severity::Error,
        4 => Severity::Warning,
        _ => Severity::Info,
    }
}

/// Parse one syslog datagram into an event. Lines that do not match the
/// RFC 3164 shape are dropped.
pub fn parse_syslog_line(line: &str) -> Option<Event> {
    let caps = SYSLOG_LINE.captures(line.trim())?;
    let pri: u32 = caps.get(1)?.as_str().parse().ok()?;
    let hostname = caps.get(2)?.as_str();
    let tag = caps.get(3)?.as_str();
    let body = caps.get(4)?.as_str().trim();
    // Events carry a non-empty message; a bare tag line has nothing to say.
    if body.is_empty() {
        return None;
    }

    let mut severity = severity_for_pri(pri);
    let mut title = format!("{tag} message");
    let mut metadata: Vec<(String, String)> = Vec::new();

    if let Some(task) = TASK_END.captures(body) {
        let upid = task.get(1).map(|m| m.as_str()).unwrap_or_default();
        let status = task.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        metadata.push(("upid".to_string(), upid.to_string()));
        metadata.push(("task_status".to_string(), status.to_string()));
        if status.eq_ignore_ascii_case("ok") {
            title = format!("{tag} task completed");
            severity = Severity::Info;
        } else {
            title = format!("{tag} task failed");
            severity = severity.max(Severity::Error);
        }
    } else if let Some(pattern) = BODY_PATTERNS.iter().find(|p| p.re.is_match(body)) {
        title = pattern.title.to_string();
        severity = severity.max(pattern.severity);
    }

    let mut event = Event::new("syslog", title, body)
        .with_severity(severity)
        .with_node(hostname)
        .with_metadata("tag", tag);
    for (key, value) in metadata {
        event = event.with_metadata(key, value);
    }
    Some(event)
}

/// Binds a UDP socket and emits one event per parseable datagram. The
/// socket is bound before the background task spawns, so a busy port
/// fails `start` instead of dying silently later.
pub struct SyslogListener {
    config: SyslogListenerConfig,
    task: ListenerTask,
    bound: Mutex<Option<SocketAddr>>,
}

impl SyslogListener {
    pub fn new(config: SyslogListenerConfig, grace: Duration) -> Self {
        Self {
            config,
            task: ListenerTask::new(grace),
            bound: Mutex::new(None),
        }
    }

    /// Address the socket actually bound to; useful when configured with
    /// port 0.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().ok().and_then(|slot| *slot)
    }
}

#[async_trait]
impl Listener for SyslogListener {
    fn name(&self) -> &str {
        "syslog"
    }

    async fn start(&self, sink: EventSink) -> Result<()> {
        let socket = UdpSocket::bind(&self.config.bind_addr)
            .await
            .map_err(|err| {
                BridgeError::listener_start_failed(
                    self.name(),
                    format!("bind {}: {err}", self.config.bind_addr),
                )
            })?;
        let local = socket.local_addr().map_err(|err| {
            BridgeError::listener_start_failed(self.name(), err.to_string())
        })?;
        if let Ok(mut slot) = self.bound.lock() {
            *slot = Some(local);
        }
        debug!(addr = %local, "Syslog listener bound");

        let mut shutdown = self.task.subscribe();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = socket.recv_from(&mut buf) => {
                        let (len, peer) = match received {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(error = %err, "Syslog receive failed");
                                continue;
                            }
                        };
                        let line = String::from_utf8_lossy(&buf[..len]);
                        match parse_syslog_line(&line) {
                            Some(event) => {
                                if sink.submit(event).await.is_err() {
                                    return;
                                }
                            }
                            None => debug!(peer = %peer, "Dropped unparseable syslog datagram"),
                        }
                    }
                }
            }
        });
        self.task.install(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.task.stop(self.name()).await;
        if let Ok(mut slot) = self.bound.lock() {
            *slot = None;
        }
        Ok(())
    }

    /// While running the held socket is the proof; otherwise bind and
    /// release to show the address is usable.
    async fn health_check(&self) -> Result<()> {
        if self.bound_addr().is_some() {
            return Ok(());
        }
        UdpSocket::bind(&self.config.bind_addr).await.map_err(|err| {
            BridgeError::listener_start_failed(
                self.name(),
                format!("bind {}: {err}", self.config.bind_addr),
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_daemon_line() {
        let event = parse_syslog_line(
            "<30>Aug 29 10:15:01 pve1 pvedaemon[1234]: worker started",
        )
        .unwrap();
        assert_eq!(event.source, "syslog");
        assert_eq!(event.node.as_deref(), Some("pve1"));
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.metadata.get("tag").map(String::as_str), Some("pvedaemon"));
    }

    #[test]
    fn failed_task_is_an_error() {
        let event = parse_syslog_line(
            "<30>Aug 29 10:15:01 pve1 pvedaemon[99]: <root@pam> end task UPID:pve1:000A:0:0:vzdump:100:root@pam: job errors",
        )
        .unwrap();
        assert_eq!(event.severity, Severity::Error);
        assert!(event.title.contains("task failed"));
        assert_eq!(
            event.metadata.get("task_status").map(String::as_str),
            Some("job errors")
        );
    }

    #[test]
    fn successful_task_stays_info() {
        let event = parse_syslog_line(
            "<30>pve1 pvedaemon[99]: <root@pam> end task UPID:pve1:000A:0:0:qmstart:100:root@pam: OK",
        )
        .unwrap();
        assert_eq!(event.severity, Severity::Info);
    }

    #[test]
    fn oom_is_critical() {
        let event = parse_syslog_line(
            "<11>Aug 29 10:15:01 pve2 kernel: Out of memory: Killed process 4242 (kvm)",
        )
        .unwrap();
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.title, "Out of memory");
    }

    #[test]
    fn fence_and_storage_patterns_classify() {
        let fence = parse_syslog_line(
            "<13>Aug 29 10:20:00 pve1 pve-ha-crm[77]: fencing node pve3",
        )
        .unwrap();
        assert_eq!(fence.title, "Node fence");
        assert_eq!(fence.severity, Severity::Critical);

        let storage = parse_syslog_line(
            "<28>Aug 29 10:21:00 pve1 pvestatd[55]: storage nfs-backup is offline",
        )
        .unwrap();
        assert_eq!(storage.title, "Storage problem");
        assert_eq!(storage.severity, Severity::Error);

        let backup = parse_syslog_line(
            "<30>Aug 29 02:00:00 pve2 vzdump[900]: starting backup of VM 100",
        )
        .unwrap();
        assert_eq!(backup.title, "Backup");
        assert_eq!(backup.severity, Severity::Info);
    }

    #[test]
    fn severe_pri_maps_to_critical() {
        assert_eq!(severity_for_pri(8), Severity::Critical); // user.emerg
        assert_eq!(severity_for_pri(11), Severity::Error);
        assert_eq!(severity_for_pri(12), Severity::Warning);
        assert_eq!(severity_for_pri(14), Severity::Info);
    }

    #[test]
    fn garbage_is_dropped() {
        assert!(parse_syslog_line("not a syslog line").is_none());
        assert!(parse_syslog_line("").is_none());
    }

    #[test]
    fn empty_body_is_dropped() {
        assert!(parse_syslog_line("<30>Aug 29 10:15:01 pve1 cron[1]:").is_none());
        assert!(parse_syslog_line("<30>Aug 29 10:15:01 pve1 cron[1]:   ").is_none());
    }

    #[tokio::test]
    async fn datagrams_flow_into_the_sink() {
        let config = SyslogListenerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
        };
        let listener = SyslogListener::new(config, Duration::from_millis(200));
        let (sink, mut rx) = EventSink::channel(8);
        listener.start(sink).await.unwrap();
        let addr = listener.bound_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(
                b"<27>Aug 29 11:00:00 pve1 pvestatd[55]: status update error",
                addr,
            )
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.node.as_deref(), Some("pve1"));
        assert_eq!(event.severity, Severity::Error);

        // The running socket vouches for the address.
        listener.health_check().await.unwrap();

        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn health_check_reports_unusable_address() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let busy = SyslogListener::new(
            SyslogListenerConfig {
                bind_addr: addr.to_string(),
            },
            Duration::from_millis(200),
        );
        assert!(busy.health_check().await.is_err());

        let free = SyslogListener::new(
            SyslogListenerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
            },
            Duration::from_millis(200),
        );
        free.health_check().await.unwrap();
    }
}
