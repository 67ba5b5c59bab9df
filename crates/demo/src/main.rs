//! Loopback demo: runs a scripted server thread and a live [`Session`]
//! against it, exercising the handshake, snapshot flow, interpolation, a
//! scripted join and leave, and the outbound publisher.

use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use glam::Vec3;
use log::info;

use tether::{
    ClientConfig, ControlFrame, DEFAULT_STATE_PORT, LocalPose, LocalState, ParticipantState,
    SERVER_PARTICIPANT_ID, Session, Snapshot,
};

#[derive(Parser)]
#[command(name = "tether-demo")]
#[command(about = "Loopback session sync demo")]
struct Args {
    /// State (UDP) port; the control channel listens one port below.
    #[arg(short, long, default_value_t = DEFAULT_STATE_PORT,
          value_parser = clap::value_parser!(u16).range(5001..6000))]
    port: u16,

    /// Scripted remote participants besides the server.
    #[arg(long, default_value_t = 2)]
    peers: u32,

    /// Seconds to run before exiting.
    #[arg(long, default_value_t = 6.0)]
    duration: f32,

    /// Server snapshot ticks per second.
    #[arg(long, default_value_t = 20)]
    tick_rate: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    // Bind the server side up front so the client's first connect attempt
    // always finds a listener.
    let listener = TcpListener::bind(("127.0.0.1", args.port - 1))
        .context("binding control channel listener")?;
    let udp = UdpSocket::bind(("127.0.0.1", args.port)).context("binding state channel socket")?;
    udp.set_nonblocking(true)
        .context("configuring state channel socket")?;

    let peers = args.peers;
    let duration = args.duration;
    let tick_rate = args.tick_rate;
    let server = thread::spawn(move || run_server(listener, udp, peers, duration + 1.0, tick_rate));

    let config = ClientConfig::for_server(IpAddr::V4(Ipv4Addr::LOCALHOST), args.port);
    let mut session = Session::new(config).context("session transport setup")?;
    session.attempt_connect();

    let frame = Duration::from_millis(16);
    let start = Instant::now();
    let mut last_report = Instant::now();

    while start.elapsed().as_secs_f32() < args.duration {
        let t = start.elapsed().as_secs_f32();
        let pose = LocalPose {
            position: Vec3::new(t.sin() * 3.0, 0.0, t.cos() * 3.0),
            rotation: Vec3::new(0.0, t, 0.0),
            moving: true,
        };

        session.on_control_readable();
        session.on_state_readable();
        session.update(frame.as_secs_f32(), &pose);

        if last_report.elapsed() >= Duration::from_secs(1) {
            report(&session);
            last_report = Instant::now();
        }

        thread::sleep(frame);
    }

    report(&session);
    server
        .join()
        .map_err(|_| anyhow!("server thread panicked"))??;

    Ok(())
}

fn report(session: &Session) {
    info!(
        "session {:?}: {} participants, snapshot {}",
        session.state(),
        session.participant_count(),
        session.last_sequence()
    );
    for record in session.roster().iter() {
        if record.live && Some(record.id) != session.local_id() {
            info!(
                "  participant {} at ({:.2}, {:.2}, {:.2})",
                record.id,
                record.displayed.position.x,
                record.displayed.position.y,
                record.displayed.position.z
            );
        }
    }
}

/// Scripted server: accepts the one demo client, assigns it the slot after
/// the scripted peers, broadcasts snapshots at the tick rate, and announces
/// one join and one leave partway through the run.
fn run_server(
    listener: TcpListener,
    udp: UdpSocket,
    peers: u32,
    duration: f32,
    tick_rate: u32,
) -> Result<()> {
    let (mut control, _) = listener.accept().context("accepting demo client")?;
    control.set_nodelay(true)?;

    // Server occupies slot 0, scripted peers 1..=peers, the client the next.
    let client_id = peers + 1;
    let count = client_id as usize + 1;
    let accept = ControlFrame {
        connected: true,
        participant_id: client_id,
    };
    control.write_all(&accept.encode())?;
    info!("server: accepted client as participant {}", client_id);

    let mut states: Vec<ParticipantState> = (0..count as u32).map(ParticipantState::new).collect();
    let mut client_addr: Option<SocketAddr> = None;
    let mut sequence = 0u32;
    let mut joined_id = None;
    let mut announced_leave = false;

    let tick = Duration::from_secs_f32(1.0 / tick_rate as f32);
    let join_at = duration / 3.0;
    let leave_at = 2.0 * duration / 3.0;
    let start = Instant::now();
    let mut buf = [0u8; 256];

    while start.elapsed().as_secs_f32() < duration {
        // Fold the client's published state into the next snapshot. The
        // publish also tells us where to send snapshots.
        loop {
            match udp.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    client_addr = Some(addr);
                    if let Ok(published) = LocalState::decode(&buf[..len]) {
                        if let Some(slot) = states.iter_mut().find(|s| s.id == published.id) {
                            slot.position = published.position;
                            slot.rotation = published.rotation;
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("state channel read"),
            }
        }

        let t = start.elapsed().as_secs_f32();

        if joined_id.is_none() && t >= join_at {
            let id = states.len() as u32;
            let frame = ControlFrame {
                connected: true,
                participant_id: id,
            };
            control.write_all(&frame.encode())?;
            states.push(ParticipantState::new(id));
            joined_id = Some(id);
            info!("server: participant {} joined", id);
        }

        if let Some(id) = joined_id {
            if !announced_leave && t >= leave_at {
                let frame = ControlFrame {
                    connected: false,
                    participant_id: id,
                };
                control.write_all(&frame.encode())?;
                states.truncate(states.len() - 1);
                announced_leave = true;
                info!("server: participant {} left", id);
            }
        }

        // Scripted peers orbit the origin.
        for state in &mut states {
            if state.id == SERVER_PARTICIPANT_ID || state.id == client_id {
                continue;
            }
            let phase = state.id as f32;
            state.position = Vec3::new((t + phase).cos() * 5.0, 0.0, (t + phase).sin() * 5.0);
            state.rotation = Vec3::new(0.0, t + phase, 0.0);
        }

        if let Some(addr) = client_addr {
            sequence += 1;
            let snapshot = Snapshot {
                sequence,
                participants: states.clone(),
            };
            let _ = udp.send_to(&snapshot.encode(), addr);
        }

        thread::sleep(tick);
    }

    Ok(())
}
