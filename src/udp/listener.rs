// UDP Listener for WSJT-X
// Joins the WSJT-X/JTDX multicast group and turns datagrams into display rows.
//
// One worker thread owns the socket, the station tracker and both outbound
// clients. Decoding and lookups happen on that thread strictly in order.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use super::message::decode_datagram;
use crate::display::{DisplayRow, DisplaySink, MonitorEvent};
use crate::hamclock::DxNotifier;
use crate::monitor::MonitorError;
use crate::qrz::{CallsignLookup, LookupResult};
use crate::tracker::StationTracker;

/// Receive buffer size; longer datagrams are cut short by the socket
pub const DATAGRAM_BUFFER_LEN: usize = 1024;

/// Windows WSAEMSGSIZE - datagram larger than the buffer
const WSAEMSGSIZE: i32 = 10040;
/// Windows WSAETIMEDOUT - normal read timeout
const WSAETIMEDOUT: i32 = 10060;

/// Cooperative stop flag shared between the worker and the control surface
pub struct MonitorState {
    running: AtomicBool,
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind `0.0.0.0:port` with address reuse and join `group` on any interface.
pub fn open_multicast_socket(
    group: Ipv4Addr,
    port: u16,
    read_timeout: Duration,
) -> Result<UdpSocket, MonitorError> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let bind_err = |source: io::Error| MonitorError::Bind { addr, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&SocketAddr::V4(addr).into()).map_err(bind_err)?;
    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .map_err(|source| MonitorError::Join { group, source })?;

    let socket: UdpSocket = socket.into();
    // Timeout lets the loop notice the stop flag
    socket.set_read_timeout(Some(read_timeout)).map_err(bind_err)?;

    log::info!("UDP listener bound to {}, joined {}", addr, group);
    Ok(socket)
}

/// Per-datagram pipeline: decode, gate on the tracker, look up, deliver.
pub struct ReceiveLoop {
    tracker: StationTracker,
    lookup: Box<dyn CallsignLookup>,
    notifier: Box<dyn DxNotifier>,
    sink: Box<dyn DisplaySink>,
}

impl ReceiveLoop {
    pub fn new(
        lookup: Box<dyn CallsignLookup>,
        notifier: Box<dyn DxNotifier>,
        sink: Box<dyn DisplaySink>,
    ) -> Self {
        Self {
            tracker: StationTracker::new(),
            lookup,
            notifier,
            sink,
        }
    }

    /// Receive until the stop flag clears or the socket fails.
    ///
    /// The flag is checked before each receive and again once a datagram
    /// arrives, so nothing read after `stop()` reaches the sink. The socket
    /// is closed and `Disconnected` delivered on every exit path.
    pub fn run(mut self, socket: UdpSocket, state: &MonitorState) -> Result<(), MonitorError> {
        let mut buf = [0u8; DATAGRAM_BUFFER_LEN];

        let result = loop {
            if !state.is_running() {
                break Ok(());
            }

            let len = match socket.recv_from(&mut buf) {
                Ok((len, src)) => {
                    log::trace!("Received {} bytes from {}", len, src);
                    len
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(ref e) if e.raw_os_error() == Some(WSAETIMEDOUT) => {
                    continue;
                }
                Err(ref e) if e.raw_os_error() == Some(WSAEMSGSIZE) => {
                    // Buffer was filled with the head of the datagram
                    log::debug!("Datagram exceeded {} bytes, decoding truncated copy", buf.len());
                    buf.len()
                }
                Err(e) => {
                    log::error!("UDP receive error: {}", e);
                    break Err(MonitorError::Receive(e));
                }
            };

            if !state.is_running() {
                log::debug!("Discarding datagram received after stop");
                break Ok(());
            }
            self.handle_datagram(&buf[..len]);
        };

        drop(socket);
        state.set_running(false);

        if let Err(ref e) = result {
            self.sink.deliver(MonitorEvent::Error(e.to_string()));
        }
        self.sink.deliver(MonitorEvent::Disconnected);
        log::info!("UDP listener stopped");
        result
    }

    /// Process one datagram. Never fails; problems become degraded rows.
    pub fn handle_datagram(&mut self, data: &[u8]) {
        let msg = match decode_datagram(data) {
            Ok(msg) => msg,
            Err(failure) => {
                log::debug!(
                    "Failed to decode {} byte datagram ({:?}): {} raw={}",
                    data.len(),
                    failure.message_type,
                    failure.error,
                    failure.raw_hex
                );
                self.sink.deliver(MonitorEvent::Row(DisplayRow::from_failure(&failure)));
                return;
            }
        };

        let Some(status) = msg.status() else {
            if msg.message_type.is_known() {
                log::trace!("Ignoring {} message", msg.message_type);
            } else {
                log::debug!(
                    "Ignoring unknown message type {} (schema {})",
                    msg.message_type.as_u32(),
                    msg.schema_version
                );
            }
            return;
        };

        let dx_call = match status.dx_call.as_deref() {
            Some(call) if !call.is_empty() => call,
            _ => {
                log::trace!("Status without DX call");
                return;
            }
        };

        if !self.tracker.should_lookup(Some(dx_call)) {
            return;
        }

        log::debug!(
            "Status: id={:?} mode={:?} freq={} dx_call={}",
            msg.client_id,
            status.mode,
            status.dial_frequency_hz,
            dx_call
        );

        let lookup = self.lookup_station(dx_call);
        let row = DisplayRow::from_lookup(&msg, dx_call, lookup);
        self.sink.deliver(MonitorEvent::Row(row));
    }

    /// Look up the new DX station and, when it has a grid, tell HamClock.
    /// Failures only cost the row its details.
    fn lookup_station(&self, dx_call: &str) -> LookupResult {
        let result = match self.lookup.lookup(dx_call) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Lookup for {} failed: {}", dx_call, e);
                return LookupResult::default();
            }
        };

        if let Some(grid) = result.grid.as_deref() {
            if let Err(e) = self.notifier.set_new_dx(grid) {
                log::warn!("Error sending grid {} to HamClock: {}", grid, e);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hamclock::NotifyError;
    use crate::qrz::LookupError;
    use crate::udp::test_support::{status_datagram, DatagramBuilder};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    type StopHook = Box<dyn Fn(&str) + Send>;

    struct FakeLookup {
        calls: Arc<Mutex<Vec<String>>>,
        grid: Option<&'static str>,
        fail: bool,
        on_lookup: Option<StopHook>,
    }

    impl FakeLookup {
        fn new(calls: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                calls,
                grid: Some("GG66"),
                fail: false,
                on_lookup: None,
            }
        }
    }

    impl CallsignLookup for FakeLookup {
        fn lookup(&self, callsign: &str) -> Result<LookupResult, LookupError> {
            self.calls.lock().unwrap().push(callsign.to_string());
            if let Some(hook) = &self.on_lookup {
                hook(callsign);
            }
            if self.fail {
                return Err(LookupError::Service("Not found".to_string()));
            }
            Ok(LookupResult {
                grid: self.grid.map(str::to_string),
                operator_name: Some(format!("Op {}", callsign)),
                country: Some("Brazil".to_string()),
            })
        }
    }

    struct FakeNotifier {
        grids: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl DxNotifier for FakeNotifier {
        fn set_new_dx(&self, grid: &str) -> Result<(), NotifyError> {
            self.grids.lock().unwrap().push(grid.to_string());
            if self.fail {
                return Err(NotifyError::Status(500));
            }
            Ok(())
        }
    }

    struct Harness {
        calls: Arc<Mutex<Vec<String>>>,
        grids: Arc<Mutex<Vec<String>>>,
        rx: mpsc::UnboundedReceiver<MonitorEvent>,
    }

    impl Harness {
        fn events(&mut self) -> Vec<MonitorEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                out.push(event);
            }
            out
        }

        fn rows(&mut self) -> Vec<DisplayRow> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    MonitorEvent::Row(row) => Some(row),
                    _ => None,
                })
                .collect()
        }
    }

    fn setup(configure: impl FnOnce(&mut FakeLookup, &mut FakeNotifier)) -> (ReceiveLoop, Harness) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let grids = Arc::new(Mutex::new(Vec::new()));
        let mut lookup = FakeLookup::new(calls.clone());
        let mut notifier = FakeNotifier {
            grids: grids.clone(),
            fail: false,
        };
        configure(&mut lookup, &mut notifier);

        let (tx, rx) = mpsc::unbounded_channel();
        let receive_loop = ReceiveLoop::new(Box::new(lookup), Box::new(notifier), Box::new(tx));
        (receive_loop, Harness { calls, grids, rx })
    }

    fn status(dx_call: Option<&str>) -> Vec<u8> {
        status_datagram(Some("WSJT-X"), 14_074_000, Some("FT8"), dx_call)
    }

    #[test]
    fn test_repeated_status_looks_up_once() {
        let (mut receive_loop, mut h) = setup(|_, _| {});

        for _ in 0..5 {
            receive_loop.handle_datagram(&status(Some("PY2UBK")));
        }

        assert_eq!(*h.calls.lock().unwrap(), vec!["PY2UBK"]);
        assert_eq!(*h.grids.lock().unwrap(), vec!["GG66"]);

        let rows = h.rows();
        assert_eq!(rows.len(), 1);
        let cols = rows[0].columns();
        assert_eq!(&cols[1..], &["STATUS", "PY2UBK", "GG66", "Op PY2UBK", "Brazil", "14.074MHz"]);
    }

    #[test]
    fn test_rows_follow_station_changes_in_order() {
        let (mut receive_loop, mut h) = setup(|_, _| {});

        for call in ["W1AW", "W1AW", "K2ABC", "K2ABC", "W1AW"] {
            receive_loop.handle_datagram(&status(Some(call)));
        }

        let calls: Vec<String> = h.rows().into_iter().filter_map(|r| r.dx_call).collect();
        assert_eq!(calls, vec!["W1AW", "K2ABC", "W1AW"]);
    }

    #[test]
    fn test_status_without_dx_call_is_skipped() {
        let (mut receive_loop, mut h) = setup(|_, _| {});

        receive_loop.handle_datagram(&status(None));
        receive_loop.handle_datagram(&status(Some("")));

        assert!(h.calls.lock().unwrap().is_empty());
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_non_status_messages_produce_no_rows() {
        let (mut receive_loop, mut h) = setup(|_, _| {});

        let heartbeat = DatagramBuilder::header(3, 0).string(Some("WSJT-X")).u32(3).build();
        let unknown = DatagramBuilder::header(3, 99).string(Some("WSJT-X")).build();
        receive_loop.handle_datagram(&heartbeat);
        receive_loop.handle_datagram(&unknown);

        assert!(h.events().is_empty());
    }

    #[test]
    fn test_decode_failure_becomes_degraded_row() {
        let (mut receive_loop, mut h) = setup(|_, _| {});

        let mut data = DatagramBuilder::header(3, 1).string(Some("")).u64(14_074_000).build();
        data.extend_from_slice(&50u32.to_be_bytes());
        data.extend_from_slice(b"FT");
        receive_loop.handle_datagram(&data);
        receive_loop.handle_datagram(b"not wsjt-x at all");

        let rows = h.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message_type, "STATUS");
        assert!(rows[0].error.as_deref().unwrap().contains("truncated"));
        assert_eq!(rows[0].raw_hex.as_deref(), Some(hex::encode(&data).as_str()));
        assert_eq!(rows[1].message_type, "ERROR");
        assert!(rows[1].error.as_deref().unwrap().contains("magic"));

        // Loop keeps working afterwards
        receive_loop.handle_datagram(&status(Some("W1AW")));
        assert_eq!(h.rows().len(), 1);
    }

    #[test]
    fn test_lookup_failure_yields_empty_row() {
        let (mut receive_loop, mut h) = setup(|lookup, _| lookup.fail = true);

        receive_loop.handle_datagram(&status(Some("XX9XX")));

        let rows = h.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dx_call.as_deref(), Some("XX9XX"));
        assert_eq!(rows[0].grid, None);
        assert!(!rows[0].is_degraded());
        assert_eq!(&rows[0].columns()[3..6], &["---", "---", "---"]);
        assert!(h.grids.lock().unwrap().is_empty());
    }

    #[test]
    fn test_no_grid_means_no_notification() {
        let (mut receive_loop, mut h) = setup(|lookup, _| lookup.grid = None);

        receive_loop.handle_datagram(&status(Some("W1AW")));

        assert!(h.grids.lock().unwrap().is_empty());
        assert_eq!(h.rows().len(), 1);
    }

    #[test]
    fn test_notification_failure_is_not_fatal() {
        let (mut receive_loop, mut h) = setup(|_, notifier| notifier.fail = true);

        receive_loop.handle_datagram(&status(Some("W1AW")));

        let rows = h.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].grid.as_deref(), Some("GG66"));
    }

    fn loopback_socket() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[test]
    fn test_run_stops_after_in_flight_lookup() {
        let state = Arc::new(MonitorState::new());
        let hook_state = state.clone();
        let (receive_loop, mut h) = setup(move |lookup, _| {
            lookup.on_lookup = Some(Box::new(move |_| hook_state.set_running(false)));
        });

        let (socket, addr) = loopback_socket();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&status(Some("W1AW")), addr).unwrap();
        sender.send_to(&status(Some("K2ABC")), addr).unwrap();

        state.set_running(true);
        let worker_state = state.clone();
        let worker = std::thread::spawn(move || receive_loop.run(socket, &worker_state));
        assert!(worker.join().unwrap().is_ok());

        // The in-flight row completes; the queued datagram is never delivered
        let events = h.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], MonitorEvent::Row(row) if row.dx_call.as_deref() == Some("W1AW")));
        assert_eq!(events[1], MonitorEvent::Disconnected);
        assert_eq!(*h.calls.lock().unwrap(), vec!["W1AW"]);
        assert!(!state.is_running());

        // Socket was released
        assert!(UdpSocket::bind(addr).is_ok());
    }

    #[test]
    fn test_run_exits_on_stop_flag_without_traffic() {
        let (receive_loop, mut h) = setup(|_, _| {});
        let (socket, _) = loopback_socket();
        let state = Arc::new(MonitorState::new());
        state.set_running(true);

        let worker_state = state.clone();
        let worker = std::thread::spawn(move || receive_loop.run(socket, &worker_state));
        std::thread::sleep(Duration::from_millis(50));
        state.set_running(false);

        assert!(worker.join().unwrap().is_ok());
        assert_eq!(h.events(), vec![MonitorEvent::Disconnected]);
    }

    #[test]
    fn test_run_reports_receive_error_once() {
        let (receive_loop, mut h) = setup(|_, _| {});
        let (socket, _) = loopback_socket();

        // Connected to a port nobody listens on: the ICMP reply surfaces as
        // ECONNREFUSED on the next receive
        let closed = UdpSocket::bind("127.0.0.1:0").unwrap();
        let closed_addr = closed.local_addr().unwrap();
        drop(closed);
        socket.connect(closed_addr).unwrap();
        socket.send(&[0]).unwrap();

        let state = Arc::new(MonitorState::new());
        state.set_running(true);
        let worker_state = state.clone();
        let worker = std::thread::spawn(move || receive_loop.run(socket, &worker_state));

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(MonitorError::Receive(_))));
        assert!(!state.is_running());

        let events = h.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], MonitorEvent::Error(msg) if msg.starts_with("UDP receive error")));
        assert_eq!(events[1], MonitorEvent::Disconnected);
    }

    #[test]
    fn test_oversized_datagram_is_ordinary_truncation() {
        let state = Arc::new(MonitorState::new());
        let hook_state = state.clone();
        let (receive_loop, mut h) = setup(move |lookup, _| {
            lookup.on_lookup = Some(Box::new(move |_| hook_state.set_running(false)));
        });

        let (socket, addr) = loopback_socket();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let long_mode = "M".repeat(2 * DATAGRAM_BUFFER_LEN);
        let oversized = status_datagram(Some(""), 14_074_000, Some(&long_mode), Some("W1AW"));
        sender.send_to(&oversized, addr).unwrap();
        sender.send_to(&status(Some("W1AW")), addr).unwrap();

        state.set_running(true);
        let worker_state = state.clone();
        let worker = std::thread::spawn(move || receive_loop.run(socket, &worker_state));
        assert!(worker.join().unwrap().is_ok());

        let rows = h.rows();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].error.as_deref().unwrap().contains("truncated"));
        assert_eq!(rows[0].raw_hex.as_ref().map(|h| h.len()), Some(2 * DATAGRAM_BUFFER_LEN));
        assert_eq!(rows[1].dx_call.as_deref(), Some("W1AW"));
    }
}
