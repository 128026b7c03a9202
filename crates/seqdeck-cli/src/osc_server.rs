//! UDP listener for OSC remote control.
//!
//! Every datagram is decoded with `rosc` and handed to the engine's
//! [`OscRouter`]. Status queries are answered on `/status` to the sender,
//! with the report JSON encoded in a single string argument.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use rosc::{encoder, OscMessage, OscPacket, OscType};
use seqdeck_core::{EngineHandle, OscRouter, Outcome, StatusReport};

/// How often the listener checks the shutdown flag.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

pub struct OscServer {
    sock: UdpSocket,
    router: OscRouter,
    engine: EngineHandle,
}

impl OscServer {
    /// Bind the listening socket. Port 0 picks a free port.
    pub fn bind(port: u16, router: OscRouter, engine: EngineHandle) -> Result<Self> {
        let sock = UdpSocket::bind(("0.0.0.0", port)).with_context(|| format!("Failed to bind OSC port {port}"))?;
        sock.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self { sock, router, engine })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.sock.local_addr()?)
    }

    /// Serve on a dedicated thread until `shutdown` is set.
    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("seqdeck-osc".into())
            .spawn(move || self.serve(&shutdown))
            .context("Failed to launch OSC thread")?;
        Ok(handle)
    }

    fn serve(self, shutdown: &AtomicBool) {
        match self.sock.local_addr() {
            Ok(addr) => log::info!("[OSC] Listening on {}", addr),
            Err(_) => log::info!("[OSC] Listening"),
        }
        let mut buf = [0u8; rosc::decoder::MTU];
        while !shutdown.load(Ordering::Relaxed) {
            let (size, from) = match self.sock.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
                Err(e) => {
                    log::warn!("[OSC] Receive failed: {}", e);
                    continue;
                }
            };
            match rosc::decoder::decode_udp(&buf[..size]) {
                Ok((_, packet)) => self.handle(&packet, from),
                Err(e) => log::warn!("[OSC] Undecodable packet from {}: {:?}", from, e),
            }
        }
        log::debug!("[OSC] Listener exiting");
    }

    fn handle(&self, packet: &OscPacket, from: SocketAddr) {
        for outcome in self.router.handle_packet(&self.engine, packet) {
            if let Outcome::Status(report) = outcome {
                if let Err(e) = self.reply(&report, from) {
                    log::warn!("[OSC] Status reply to {} failed: {:#}", from, e);
                }
            }
        }
    }

    fn reply(&self, report: &StatusReport, to: SocketAddr) -> Result<()> {
        let json = serde_json::to_string(report)?;
        let packet = OscPacket::Message(OscMessage {
            addr: "/status".to_string(),
            args: vec![OscType::String(json)],
        });
        let buf = encoder::encode(&packet)?;
        self.sock.send_to(&buf, to)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqdeck_core::{Engine, EngineConfig, LogBus, LoopPattern};

    fn send(sock: &UdpSocket, to: SocketAddr, addr: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        sock.send_to(&encoder::encode(&packet).unwrap(), to).unwrap();
    }

    #[test]
    fn test_status_reply() {
        let config = EngineConfig::default();
        let engine = Engine::new(&config, Arc::new(LogBus));
        let handle = engine.handle().clone();
        handle.add(2, Box::new(LoopPattern::new("bass", 768))).unwrap();

        let server = OscServer::bind(0, OscRouter::new(config.layout()), handle.clone()).unwrap();
        let port = server.local_addr().unwrap().port();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread = server.spawn(shutdown.clone()).unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let server_addr: SocketAddr = ([127, 0, 0, 1], port).into();

        send(&client, server_addr, "/sequence", vec![OscType::String("on".into()), OscType::Int(2)]);
        send(&client, server_addr, "/status", vec![]);

        let mut buf = [0u8; rosc::decoder::MTU];
        let (size, _) = client.recv_from(&mut buf).unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buf[..size]).unwrap();
        let OscPacket::Message(msg) = packet else {
            panic!("expected a message");
        };
        assert_eq!(msg.addr, "/status");
        let Some(OscType::String(json)) = msg.args.first() else {
            panic!("expected a string argument");
        };
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["transport"], "stopped");
        assert_eq!(value["slots"][0]["slot"], 2);
        assert_eq!(value["slots"][0]["armed"], true);

        shutdown.store(true, Ordering::Relaxed);
        thread.join().unwrap();
    }
}
