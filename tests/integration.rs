//! End-to-end tests: real server, real loopback sockets.
//!
//! Each test binds its own fixed RTSP port so tests can run in parallel.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use rtsp_cam::{Server, ServerConfig, TransportType};

fn make_server(port: u16, transport: TransportType, sample_rate: Option<u32>) -> Server {
    let mut server = Server::new(ServerConfig {
        transport,
        rtsp_port: port,
        sample_rate,
        device_id: Some(0xAABB_CCDD_1122_3344),
        ..ServerConfig::default()
    })
    .expect("config");
    server.start().expect("server start");
    server
}

fn connect(port: u16) -> TcpStream {
    let addr = format!("127.0.0.1:{}", port)
        .to_socket_addrs()
        .unwrap()
        .next()
        .unwrap();
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
        .set_write_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

/// Send a request and read the response (headers plus Content-Length body).
fn rtsp_request(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).unwrap();
    stream.flush().unwrap();

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap() == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    if let Some(len) = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if len > 0 {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).unwrap();
            response.push_str(&String::from_utf8_lossy(&body));
        }
    }

    response
}

fn session_id_of(response: &str) -> String {
    response
        .lines()
        .find(|l| l.to_lowercase().starts_with("session:"))
        .and_then(|l| l.split(':').nth(1))
        .map(|v| v.trim().split(';').next().unwrap_or("").trim().to_string())
        .expect("Session header")
}

fn rtp_seq(packet: &[u8]) -> u16 {
    u16::from_be_bytes([packet[2], packet[3]])
}

fn rtp_ts(packet: &[u8]) -> u32 {
    u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]])
}

/// UDP unicast video happy path: full handshake, then one frame
/// fragmented onto the declared client port.
#[test]
fn udp_unicast_video_happy_path() {
    let server = make_server(18600, TransportType::VideoOnly, None);
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let rtp_port = receiver.local_addr().unwrap().port();

    let mut stream = connect(18600);
    let base = "rtsp://127.0.0.1:18600";

    let resp = rtsp_request(
        &mut stream,
        &format!("OPTIONS {}/ RTSP/1.0\r\nCSeq: 1\r\n\r\n", base),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "OPTIONS: {}", resp);
    assert!(resp.contains("Public: DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN"));
    assert!(resp.contains("CSeq: 1\r\n"));
    assert!(resp.contains("Date: "));

    let resp = rtsp_request(
        &mut stream,
        &format!("DESCRIBE {}/ RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n", base),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "DESCRIBE: {}", resp);
    assert!(resp.contains("Content-Type: application/sdp"));
    assert!(resp.contains("Content-Base: rtsp://127.0.0.1:18600/"));
    assert!(resp.contains("m=video 0 RTP/AVP 26"));
    assert!(resp.contains("a=control:video"));
    assert!(!resp.contains("m=audio"), "audio not configured");

    let resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {}/video RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            base, rtp_port, rtp_port + 1
        ),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", resp);
    assert!(resp.contains(&format!(
        "Transport: RTP/AVP;unicast;client_port={}-{};server_port=5430-5431",
        rtp_port,
        rtp_port + 1
    )));
    let session = session_id_of(&resp);
    assert_ne!(session, "0");

    let resp = rtsp_request(
        &mut stream,
        &format!("PLAY {}/ RTSP/1.0\r\nCSeq: 4\r\nSession: {}\r\n\r\n", base, session),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {}", resp);
    assert!(resp.contains("Range: npt=0.000-"));
    assert!(resp.contains("RTP-Info:"));

    assert!(server.is_playing());
    assert_eq!(server.active_clients(), 1);

    let frame = vec![0x5Au8; 40_000];
    server.push_frame(&frame, 60, 640, 480).unwrap();

    let expected = 40_000usize.div_ceil(1438);
    let mut packets = Vec::new();
    let mut buf = [0u8; 2048];
    while packets.len() < expected {
        let (n, _) = receiver.recv_from(&mut buf).expect("RTP packet");
        packets.push(buf[..n].to_vec());
    }
    packets.sort_by_key(|p| rtp_seq(p));

    let first_ts = rtp_ts(&packets[0]);
    let mut total_payload = 0usize;
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(p[0] >> 6, 2, "RTP version");
        assert_eq!(p[1] & 0x7F, 26, "JPEG payload type");
        assert_eq!(rtp_seq(p) as usize, i, "contiguous sequence");
        assert_eq!(rtp_ts(p), first_ts, "one timestamp per frame");
        assert_eq!(
            u32::from_be_bytes([p[8], p[9], p[10], p[11]]),
            0x1122_3344,
            "video SSRC from device id"
        );

        let is_last = i == packets.len() - 1;
        assert_eq!(p[1] & 0x80 == 0x80, is_last, "marker only on last fragment");

        let offset = ((p[13] as usize) << 16) | ((p[14] as usize) << 8) | p[15] as usize;
        assert_eq!(offset, total_payload, "fragment offset tracks frame bytes");
        assert_eq!(p[16], 0, "baseline type");
        assert_eq!(p[17], 60, "quality");
        assert_eq!(p[18], 80, "width/8");
        assert_eq!(p[19], 60, "height/8");
        total_payload += p.len() - 20;
    }
    assert_eq!(total_payload, 40_000, "offsets cover the whole frame");

    drop(stream);
    drop(server);
}

/// Audio interleaved into the RTSP TCP connection.
#[test]
fn tcp_interleaved_audio() {
    let server = make_server(18601, TransportType::AudioOnly, Some(48_000));
    let mut stream = connect(18601);
    let base = "rtsp://127.0.0.1:18601";

    let resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {}/audio RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP/TCP;unicast;interleaved=2-3\r\n\r\n",
            base
        ),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP: {}", resp);
    assert!(resp.contains("Transport: RTP/AVP/TCP;unicast;interleaved=2-3"));
    let session = session_id_of(&resp);

    let resp = rtsp_request(
        &mut stream,
        &format!("PLAY {}/ RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n", base, session),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PLAY: {}", resp);

    server.push_audio(&vec![0i16; 2048]);

    // 2048 samples = 4096 payload bytes -> 4 packets of 512 samples.
    for i in 0..4u16 {
        let mut frame_header = [0u8; 4];
        stream.read_exact(&mut frame_header).expect("frame header");
        assert_eq!(frame_header[0], 0x24, "interleave magic");
        assert_eq!(frame_header[1], 2, "negotiated channel");
        let len = u16::from_be_bytes([frame_header[2], frame_header[3]]) as usize;
        assert_eq!(len, 12 + 1024, "RTP packet length in the frame header");

        let mut rtp = vec![0u8; len];
        stream.read_exact(&mut rtp).expect("RTP packet");
        assert_eq!(rtp[1] & 0x7F, 97, "L16 payload type");
        assert_eq!(rtp[1] & 0x80, 0x80, "marker on every audio packet");
        assert_eq!(rtp_seq(&rtp), i, "sequence +1 per packet");
        assert_eq!(rtp_ts(&rtp), u32::from(i) * 512, "timestamp counts samples");
    }

    drop(stream);
    drop(server);
}

/// A unicast SETUP after a multicast first client is
/// rejected with 461.
#[test]
fn multicast_admission_rejects_unicast() {
    let server = make_server(18602, TransportType::VideoOnly, None);
    let base = "rtsp://127.0.0.1:18602";

    let mut client_a = connect(18602);
    let resp = rtsp_request(
        &mut client_a,
        &format!("SETUP {}/video RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;multicast\r\n\r\n", base),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "multicast SETUP: {}", resp);
    assert!(resp.contains("Transport: RTP/AVP;multicast;destination=239.255.0.1;port=5430-5431;ttl=64"));

    let mut client_b = connect(18602);
    let resp = rtsp_request(
        &mut client_b,
        &format!(
            "SETUP {}/video RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n",
            base
        ),
    );
    assert!(
        resp.starts_with("RTSP/1.0 461 Unsupported Transport"),
        "mismatched SETUP: {}",
        resp
    );

    drop(client_a);
    drop(client_b);
    drop(server);
}

/// At capacity, a fresh connection gets the bare 503
/// line and EOF.
#[test]
fn overflow_gets_bare_503() {
    let server = make_server(18603, TransportType::VideoOnly, None);
    let base = "rtsp://127.0.0.1:18603";

    let mut client_a = connect(18603);
    let resp = rtsp_request(
        &mut client_a,
        &format!(
            "SETUP {}/video RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n",
            base
        ),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"));
    assert_eq!(server.max_clients(), 1, "unicast first client pins cap to 1");

    let mut client_b = connect(18603);
    let mut received = Vec::new();
    client_b.read_to_end(&mut received).expect("read until EOF");
    assert_eq!(
        received.as_slice(),
        b"RTSP/1.0 503 Service Unavailable\r\n\r\n",
        "wire-exact refusal"
    );

    drop(client_a);
    drop(server);
}

/// Under a multicast profile with ceiling K, SETUPs are admitted up to K
/// and the (K+1)-th is rejected with 461.
#[test]
fn multicast_ceiling_overflow_gets_461() {
    let mut server = Server::new(ServerConfig {
        transport: TransportType::VideoOnly,
        rtsp_port: 18610,
        max_clients: 2,
        ..ServerConfig::default()
    })
    .unwrap();
    server.start().unwrap();
    let base = "rtsp://127.0.0.1:18610";

    // All three connect before anyone SETs UP, so none is refused at
    // accept time; the ceiling bites at the third SETUP.
    let mut clients: Vec<TcpStream> = (0..3).map(|_| connect(18610)).collect();
    for (i, client) in clients.iter_mut().take(2).enumerate() {
        let resp = rtsp_request(
            client,
            &format!(
                "SETUP {}/video RTSP/1.0\r\nCSeq: {}\r\nTransport: RTP/AVP;multicast\r\n\r\n",
                base,
                i + 1
            ),
        );
        assert!(resp.starts_with("RTSP/1.0 200 OK"), "SETUP {}: {}", i, resp);
    }
    assert_eq!(server.active_clients(), 2);

    let resp = rtsp_request(
        &mut clients[2],
        &format!("SETUP {}/video RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;multicast\r\n\r\n", base),
    );
    assert!(
        resp.starts_with("RTSP/1.0 461 Unsupported Transport"),
        "over-ceiling SETUP: {}",
        resp
    );
    assert!(resp.contains("CSeq: 3\r\n"));

    // The refused connection stays usable.
    let resp = rtsp_request(
        &mut clients[2],
        &format!("OPTIONS {}/ RTSP/1.0\r\nCSeq: 4\r\n\r\n", base),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "{}", resp);

    server.stop();
}

/// Sequence numbers continue across PAUSE/PLAY and the
/// timestamp gap reflects wall-clock time.
#[test]
fn pause_resume_continuity() {
    let server = make_server(18604, TransportType::VideoOnly, None);
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let rtp_port = receiver.local_addr().unwrap().port();

    let mut stream = connect(18604);
    let base = "rtsp://127.0.0.1:18604";

    let resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {}/video RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            base, rtp_port, rtp_port + 1
        ),
    );
    let session = session_id_of(&resp);
    rtsp_request(
        &mut stream,
        &format!("PLAY {}/ RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n", base, session),
    );

    let frame = vec![0u8; 500]; // single-packet frames
    let mut recv_packet = || {
        let mut buf = [0u8; 2048];
        let (n, _) = receiver.recv_from(&mut buf).expect("RTP packet");
        buf[..n].to_vec()
    };

    for _ in 0..3 {
        server.push_frame(&frame, 60, 640, 480).unwrap();
        std::thread::sleep(Duration::from_millis(10));
    }
    let mut pre_pause = Vec::new();
    for _ in 0..3 {
        pre_pause.push(recv_packet());
    }
    let last_pre = pre_pause.last().unwrap().clone();

    let resp = rtsp_request(
        &mut stream,
        &format!("PAUSE {}/ RTSP/1.0\r\nCSeq: 3\r\nSession: {}\r\n\r\n", base, session),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "PAUSE: {}", resp);
    assert!(!server.is_playing());

    // Paused pushes are dropped entirely.
    server.push_frame(&frame, 60, 640, 480).unwrap();

    std::thread::sleep(Duration::from_millis(250));

    let resp = rtsp_request(
        &mut stream,
        &format!("PLAY {}/ RTSP/1.0\r\nCSeq: 4\r\nSession: {}\r\n\r\n", base, session),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"));

    server.push_frame(&frame, 60, 640, 480).unwrap();
    let first_post = recv_packet();

    assert_eq!(
        rtp_seq(&first_post),
        rtp_seq(&last_pre) + 1,
        "no sequence skipped across pause"
    );
    let gap = rtp_ts(&first_post).wrapping_sub(rtp_ts(&last_pre));
    assert!(
        gap >= 200 * 90,
        "timestamp gap must reflect the paused wall-clock time, got {} ticks",
        gap
    );

    drop(stream);
    drop(server);
}

/// An abrupt client disconnect is cleaned up by the
/// control loop; a producer push in the window completes without error.
#[test]
fn peer_reset_cleanup() {
    let server = make_server(18605, TransportType::VideoOnly, None);
    let mut stream = connect(18605);
    let base = "rtsp://127.0.0.1:18605";

    let resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {}/video RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=6100-6101\r\n\r\n",
            base
        ),
    );
    let session = session_id_of(&resp);
    rtsp_request(
        &mut stream,
        &format!("PLAY {}/ RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n", base, session),
    );
    assert_eq!(server.active_clients(), 1);

    drop(stream); // abrupt close, no TEARDOWN

    // The session may still be in the registry for one loop iteration;
    // the push must succeed regardless.
    server.push_frame(&[0u8; 100], 60, 640, 480).unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while server.active_clients() != 0 {
        assert!(Instant::now() < deadline, "session not cleaned up");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!server.is_playing());

    drop(server);
}

/// After the last TEARDOWN the admission profile resets: a new first
/// client may pick a different transport.
#[test]
fn teardown_resets_admission_profile() {
    let server = make_server(18606, TransportType::VideoOnly, None);
    let base = "rtsp://127.0.0.1:18606";

    let mut client_a = connect(18606);
    let resp = rtsp_request(
        &mut client_a,
        &format!(
            "SETUP {}/video RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port=6200-6201\r\n\r\n",
            base
        ),
    );
    let session = session_id_of(&resp);
    let resp = rtsp_request(
        &mut client_a,
        &format!("TEARDOWN {}/ RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n", base, session),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "TEARDOWN: {}", resp);

    let deadline = Instant::now() + Duration::from_secs(1);
    while server.active_clients() != 0 {
        assert!(Instant::now() < deadline, "session not removed");
        std::thread::sleep(Duration::from_millis(10));
    }

    let mut client_b = connect(18606);
    let resp = rtsp_request(
        &mut client_b,
        &format!("SETUP {}/video RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;multicast\r\n\r\n", base),
    );
    assert!(
        resp.starts_with("RTSP/1.0 200 OK"),
        "fresh first client may switch transports: {}",
        resp
    );

    drop(client_b);
    drop(server);
}

/// CSeq is echoed verbatim; OPTIONS responses are byte-identical modulo
/// the Date header.
#[test]
fn cseq_echo_and_options_idempotence() {
    let server = make_server(18607, TransportType::VideoOnly, None);
    let mut stream = connect(18607);
    let base = "rtsp://127.0.0.1:18607";

    let strip_date = |resp: &str| -> String {
        resp.lines()
            .filter(|l| !l.starts_with("Date:"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let first = rtsp_request(
        &mut stream,
        &format!("OPTIONS {}/ RTSP/1.0\r\nCSeq: 42\r\n\r\n", base),
    );
    assert!(first.contains("CSeq: 42\r\n"), "CSeq echoed: {}", first);

    let second = rtsp_request(
        &mut stream,
        &format!("OPTIONS {}/ RTSP/1.0\r\nCSeq: 42\r\n\r\n", base),
    );
    assert_eq!(strip_date(&first), strip_date(&second));

    // Missing CSeq is answered with a bare 400 and the connection stays up.
    let resp = rtsp_request(&mut stream, &format!("OPTIONS {}/ RTSP/1.0\r\n\r\n", base));
    assert!(resp.starts_with("RTSP/1.0 400 Bad Request"), "{}", resp);
    let resp = rtsp_request(
        &mut stream,
        &format!("OPTIONS {}/ RTSP/1.0\r\nCSeq: 43\r\n\r\n", base),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "connection survives a 400");

    drop(stream);
    drop(server);
}

/// RTCP-style packets and interleaved frames sent up the control socket
/// are ignored; the next real request still works.
#[test]
fn control_socket_ignores_binary() {
    let server = make_server(18608, TransportType::VideoOnly, None);
    let mut stream = connect(18608);
    let base = "rtsp://127.0.0.1:18608";

    // An interleaved frame (client-side RTCP over TCP) and a bare
    // RTCP receiver report.
    stream.write_all(&[0x24, 0x01, 0x00, 0x02, 0xAA, 0xBB]).unwrap();
    stream.flush().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    stream.write_all(&[0x80, 201, 0x00, 0x01, 0, 0, 0, 0]).unwrap();
    stream.flush().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let resp = rtsp_request(
        &mut stream,
        &format!("OPTIONS {}/ RTSP/1.0\r\nCSeq: 5\r\n\r\n", base),
    );
    assert!(resp.starts_with("RTSP/1.0 200 OK"), "{}", resp);

    drop(stream);
    drop(server);
}

/// The video worker path preserves delivery and drop-on-busy semantics.
#[test]
fn video_worker_delivers_frames() {
    let mut server = Server::new(ServerConfig {
        transport: TransportType::VideoOnly,
        rtsp_port: 18609,
        video_worker: true,
        ..ServerConfig::default()
    })
    .unwrap();
    server.start().unwrap();

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let rtp_port = receiver.local_addr().unwrap().port();

    let mut stream = connect(18609);
    let base = "rtsp://127.0.0.1:18609";
    let resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP {}/video RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            base, rtp_port, rtp_port + 1
        ),
    );
    let session = session_id_of(&resp);
    rtsp_request(
        &mut stream,
        &format!("PLAY {}/ RTSP/1.0\r\nCSeq: 2\r\nSession: {}\r\n\r\n", base, session),
    );

    server.push_frame(&vec![0x33u8; 3000], 60, 640, 480).unwrap();

    let expected = 3000usize.div_ceil(1438);
    let mut buf = [0u8; 2048];
    for _ in 0..expected {
        receiver.recv_from(&mut buf).expect("worker-delivered packet");
    }

    drop(stream);
    server.stop();
}
