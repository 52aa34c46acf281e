//! Integration tests: a viewer session against a fake camera on loopback.
//!
//! The fake camera answers beacon queries over UDP, serves control
//! exchanges over TCP, and on announce connects back to the viewer's
//! listener to stream PNG frames.

use std::io::{self, Cursor, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use picam::codec::{self, StreamFault};
use picam::discovery::beacon::{BeaconQuery, BeaconReply};
use picam::{
    BeaconConfig, BeaconDiscovery, CameraError, CameraSession, CaptureHandle, ConnectOutcome, ConnectTask,
    FrameChannel, SessionConfig, SessionState, SettingsDocument, StreamEvent,
};
use serde_json::{Value, json};

fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb([shade, 0, 255 - shade]))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// What the fake camera does after its scripted frames.
#[derive(Clone, Copy)]
enum After {
    /// Send the zero-length end marker.
    End,
    /// Close the socket without a marker.
    Hangup,
    /// Send a payload that is not an image.
    Garbage,
    /// Keep streaming until the viewer goes away.
    Hold,
}

#[derive(Clone)]
struct Script {
    frames: Vec<Vec<u8>>,
    after: After,
    /// Document returned on announce.
    initial: SettingsDocument,
    /// Verdict and document returned on submit.
    verdict: bool,
    reply: SettingsDocument,
}

impl Script {
    fn frames(count: u8, after: After) -> Self {
        Self {
            frames: (0..count).map(|i| png(8, 6, i.wrapping_mul(40))).collect(),
            after,
            initial: SettingsDocument::picam_defaults(),
            verdict: true,
            reply: SettingsDocument::picam_defaults(),
        }
    }
}

struct FakeCamera {
    beacon: SocketAddr,
    submitted: Arc<Mutex<Vec<SettingsDocument>>>,
    /// After `End` or `Garbage`: whether the viewer closed the stream.
    stream_closed: Arc<Mutex<Vec<bool>>>,
}

impl FakeCamera {
    fn start(name: &'static str, script: Script) -> Self {
        let control = TcpListener::bind("127.0.0.1:0").unwrap();
        let control_port = control.local_addr().unwrap().port();
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let stream_closed = Arc::new(Mutex::new(Vec::new()));

        let beacon = UdpSocket::bind("127.0.0.1:0").unwrap();
        let beacon_addr = beacon.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            while let Ok((len, from)) = beacon.recv_from(&mut buf) {
                let Ok(query) = serde_json::from_slice::<BeaconQuery>(&buf[..len]) else {
                    continue;
                };
                let address = (query.name == name).then(|| format!("0.0.0.0:{control_port}"));
                let reply = BeaconReply {
                    nonce: query.nonce,
                    name: query.name,
                    address,
                };
                let _ = beacon.send_to(&serde_json::to_vec(&reply).unwrap(), from);
            }
        });

        let seen = submitted.clone();
        let closed = stream_closed.clone();
        thread::spawn(move || {
            for conn in control.incoming() {
                let Ok(mut conn) = conn else { break };
                let Ok(Some(request)) = codec::read_prefixed(&mut conn, 1 << 20) else {
                    continue;
                };
                let request: Value = serde_json::from_slice(&request).unwrap();

                let reply = match request {
                    Value::String(address) => {
                        let address: SocketAddr = address.parse().unwrap();
                        let streamed = script.clone();
                        let closed = closed.clone();
                        thread::spawn(move || stream_to(address, streamed, &closed));
                        serde_json::to_value(&script.initial).unwrap()
                    }
                    document => {
                        seen.lock().push(serde_json::from_value(document).unwrap());
                        json!([script.verdict, script.reply])
                    }
                };
                codec::write_prefixed(&mut conn, &serde_json::to_vec(&reply).unwrap()).unwrap();
            }
        });

        Self {
            beacon: beacon_addr,
            submitted,
            stream_closed,
        }
    }

    fn session(&self, name: &str) -> CameraSession {
        session_with_beacon(self.beacon, name, 0)
    }
}

fn stream_to(address: SocketAddr, script: Script, closed: &Mutex<Vec<bool>>) {
    let Ok(mut conn) = TcpStream::connect(address) else {
        return;
    };
    for frame in &script.frames {
        if codec::write_prefixed(&mut conn, frame).is_err() {
            return;
        }
    }
    match script.after {
        After::End => {
            let _ = codec::write_prefixed(&mut conn, &[]);
            closed.lock().push(sees_close(&mut conn));
        }
        After::Garbage => {
            let _ = codec::write_prefixed(&mut conn, &[0xAB; 16]);
            closed.lock().push(sees_close(&mut conn));
        }
        After::Hangup => {}
        After::Hold => {
            let frame = png(8, 6, 200);
            while codec::write_prefixed(&mut conn, &frame).is_ok() {
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Whether the viewer closes its end within two seconds.
fn sees_close(conn: &mut TcpStream) -> bool {
    let _ = conn.set_read_timeout(Some(Duration::from_secs(2)));
    let mut byte = [0u8; 1];
    match conn.read(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => e.kind() == io::ErrorKind::ConnectionReset,
    }
}

fn session_with_beacon(beacon: SocketAddr, name: &str, port: u16) -> CameraSession {
    let discovery = BeaconDiscovery::new(BeaconConfig {
        beacon_addr: beacon,
        poll_interval: Duration::from_millis(50),
        exchange_timeout: Duration::from_secs(2),
        ..BeaconConfig::default()
    });
    let config = SessionConfig {
        bind_host: Ipv4Addr::LOCALHOST.into(),
        ..SessionConfig::new(name, port)
    };
    CameraSession::new(config, Arc::new(discovery))
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn frames_then_end_marker_returns_to_idle() {
    let camera = FakeCamera::start("picam", Script::frames(2, After::End));
    let mut session = camera.session("picam");

    session.connect(Duration::from_secs(2)).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.remote_addr().is_some());
    assert!(session.peer_addr().is_some());

    let first = session.get_image().unwrap().expect("first frame");
    let second = session.get_image().unwrap().expect("second frame");
    assert_eq!((first.width(), first.height()), (8, 6));
    assert_eq!(first.sequence(), 0);
    assert_eq!(second.sequence(), 1);

    assert!(session.get_image().unwrap().is_none());
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.remote_addr().is_none());
    assert!(matches!(session.get_image(), Err(CameraError::NotConnected)));
    assert!(matches!(session.disconnect(), Err(CameraError::NotConnected)));
}

#[test]
fn hangup_is_reported_as_fault() {
    let camera = FakeCamera::start("picam", Script::frames(1, After::Hangup));
    let mut session = camera.session("picam");
    session.connect(Duration::from_secs(2)).unwrap();

    assert!(matches!(session.next_event().unwrap(), StreamEvent::Frame(_)));
    assert!(matches!(
        session.next_event().unwrap(),
        StreamEvent::Fault(StreamFault::ShortRead)
    ));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn listener_is_released_after_disconnect() {
    let camera = FakeCamera::start("picam", Script::frames(1, After::Hold));
    let mut session = camera.session("picam");
    session.connect(Duration::from_secs(2)).unwrap();

    let listen = session.listener_addr().expect("listener bound while connected");
    session.disconnect().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.listener_addr().is_none());

    TcpListener::bind(listen).expect("listener port reusable after disconnect");
}

#[test]
fn connect_twice_is_usage_error() {
    let camera = FakeCamera::start("picam", Script::frames(0, After::Hold));
    let mut session = camera.session("picam");
    session.connect(Duration::from_secs(2)).unwrap();

    assert!(matches!(
        session.connect(Duration::from_secs(2)),
        Err(CameraError::AlreadyConnected)
    ));
    assert!(session.is_connected());
}

#[test]
fn announce_reply_replaces_local_settings() {
    let mut script = Script::frames(0, After::Hold);
    script.initial.set_value("brightness", 70).unwrap();
    script.initial.set_toggle("servos.enable", false).unwrap();
    let expected = script.initial.clone();

    let camera = FakeCamera::start("picam", script);
    let mut session = camera.session("picam");
    assert_eq!(session.settings().snapshot(), SettingsDocument::picam_defaults());

    session.connect(Duration::from_secs(2)).unwrap();
    assert_eq!(session.settings().snapshot(), expected);
}

#[test]
fn rejected_update_adopts_camera_document() {
    let mut script = Script::frames(0, After::Hold);
    script.verdict = false;
    script.reply.set_value("brightness", 55).unwrap();
    let authoritative = script.reply.clone();

    let camera = FakeCamera::start("picam", script);
    let mut session = camera.session("picam");
    session.connect(Duration::from_secs(2)).unwrap();

    session.settings().assign("brightness", "99").unwrap();
    let accepted = session.update_settings().unwrap();

    assert!(!accepted);
    assert_eq!(session.settings().snapshot(), authoritative);

    let submitted = camera.submitted.lock();
    assert_eq!(submitted.len(), 1);
    assert_eq!(
        submitted[0].get("brightness").and_then(|p| p.current()),
        Some("99".to_string())
    );
}

#[test]
fn update_settings_while_idle_is_not_connected() {
    let camera = FakeCamera::start("picam", Script::frames(0, After::End));
    let session = camera.session("picam");
    assert!(matches!(session.update_settings(), Err(CameraError::NotConnected)));
    assert!(camera.submitted.lock().is_empty());
}

#[test]
fn unknown_name_is_not_found() {
    let camera = FakeCamera::start("picam", Script::frames(0, After::End));
    let mut session = camera.session("doorcam");

    let err = session.connect(Duration::from_secs(2)).unwrap_err();
    assert!(matches!(err, CameraError::NotFound(name) if name == "doorcam"));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn discovery_timeout_leaves_port_free() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let scratch = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = scratch.local_addr().unwrap().port();
    drop(scratch);

    let mut session = session_with_beacon(silent.local_addr().unwrap(), "picam", port);
    let err = session.connect(Duration::from_millis(200)).unwrap_err();

    assert!(matches!(err, CameraError::DiscoveryTimeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Idle);
    TcpListener::bind(("127.0.0.1", port)).expect("port free after timed-out connect");
}

#[test]
fn connect_task_hands_back_connected_session() {
    let camera = FakeCamera::start("picam", Script::frames(1, After::End));
    let task = ConnectTask::spawn(camera.session("picam"), Duration::from_secs(1));

    let mut session = task.join().unwrap().into_result().unwrap();
    assert!(session.is_connected());
    assert!(session.get_image().unwrap().is_some());
}

#[test]
fn connect_task_retries_until_camera_appears() {
    // Nothing answers yet: every attempt times out.
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let task = ConnectTask::spawn(
        session_with_beacon(silent.local_addr().unwrap(), "picam", 0),
        Duration::from_millis(50),
    );

    wait_until("two attempts", || task.attempts() >= 2);
    assert_ne!(task.status().get(), SessionState::Connected);
    task.cancel();

    match task.join().unwrap() {
        ConnectOutcome::Cancelled(session) => assert_eq!(session.state(), SessionState::Idle),
        other => panic!("expected cancellation, got {other:?}"),
    }
}

#[test]
fn capture_thread_feeds_channel_until_stopped() {
    let camera = FakeCamera::start("picam", Script::frames(3, After::Hold));
    let mut session = camera.session("picam");
    session.connect(Duration::from_secs(2)).unwrap();
    let control = session.control();

    let channel = FrameChannel::new(4);
    let capture = CaptureHandle::spawn(session, channel.clone()).unwrap();

    wait_until("frames in channel", || channel.len() >= 3);
    let first = channel.try_pop().expect("frame");
    let second = channel.try_pop().expect("frame");
    assert!(second.sequence() > first.sequence());

    capture.pause();
    assert!(capture.is_paused());
    wait_until("frames dropped while paused", || capture.frames_dropped() >= 2);
    let captured_while_paused = capture.frames_captured();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(capture.frames_captured(), captured_while_paused);

    capture.resume();
    wait_until("capture resumed", || capture.frames_captured() > captured_while_paused);

    // Settings go over the control channel while the capture thread owns the stream.
    assert!(control.update_settings().unwrap());
    assert_eq!(camera.submitted.lock().len(), 1);

    let session = capture.stop_and_join().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_connected());
    assert!(channel.len() <= channel.capacity());
}

#[test]
fn capture_thread_exits_when_stream_ends() {
    let camera = FakeCamera::start("picam", Script::frames(2, After::End));
    let mut session = camera.session("picam");
    session.connect(Duration::from_secs(2)).unwrap();

    let channel = FrameChannel::new(8);
    let capture = CaptureHandle::spawn(session, channel.clone()).unwrap();
    let status = capture.status().clone();

    wait_until("capture thread exit", || capture.is_finished());
    assert_eq!(status.get(), SessionState::Idle);
    assert_eq!(capture.frames_captured(), 2);

    let session = capture.join().unwrap();
    assert!(!session.is_connected());
    assert_eq!(channel.len(), 2);
}

#[test]
fn capture_closes_stream_once_session_goes_idle() {
    for after in [After::End, After::Garbage] {
        let camera = FakeCamera::start("picam", Script::frames(1, after));
        let mut session = camera.session("picam");
        session.connect(Duration::from_secs(2)).unwrap();

        let capture = CaptureHandle::spawn(session, FrameChannel::new(4)).unwrap();
        wait_until("capture thread exit", || capture.is_finished());
        assert_eq!(capture.status().get(), SessionState::Idle);

        // The handle is still alive and holds its own copy of the socket.
        wait_until("camera stream result", || !camera.stream_closed.lock().is_empty());
        assert_eq!(*camera.stream_closed.lock(), vec![true]);

        capture.join().unwrap();
    }
}
