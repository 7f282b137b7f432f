use anyhow::{bail, Result};
use bytes::Bytes;
use clap::Parser;
use classroom_call::rtp;
use classroom_call::*;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// runs a teacher and a few student devices in one process. the teacher calls every student
// in turn, each student answers, and the call is hung up after a few seconds.
// capture is simulated: blank RTP packets are fed to the media workers.

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// names of the student devices to register
    #[arg(default_values_t = vec!["Amir".to_string(), "Bea".to_string()])]
    students: Vec<String>,
    /// how long each call lasts, in seconds
    #[arg(short, long, default_value_t = 5)]
    seconds: u64,
    /// a JSON CallConfig
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%3f"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Debug)
        .filter(Some("webrtc"), log::LevelFilter::Warn)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CallConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => CallConfig::default(),
    };

    let directory = Directory::new();
    let bus = InProcessBus::new();

    let mut teacher = device(&directory, &bus, &config)?;
    teacher.set_role(Role::Teacher).await;

    let mut students = vec![];
    for name in &cli.students {
        let mut student = device(&directory, &bus, &config)?;
        student.register_device(name).await;
        students.push(student);
    }

    tokio::select! {
        r = run(&teacher, &students, Duration::from_secs(cli.seconds)) => {
            if let Err(e) = r {
                log::error!("classroom terminated: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
        }
    }

    teacher.shutdown().await;
    for student in &mut students {
        student.shutdown().await;
    }

    Ok(())
}

async fn run(teacher: &CallClient, students: &[CallClient], duration: Duration) -> Result<()> {
    for student in students {
        let view = student.view();
        let Some(student_id) = view.user_id else {
            bail!("student device is not registered");
        };
        println!("calling {}", &student_id);
        teacher.start_call(&student_id).await?;

        wait_for(student, |v| v.incoming_call.is_some()).await?;
        student.answer_call().await?;

        wait_for(teacher, |v| v.call_state == CallState::Connected).await?;
        println!("connected to {}", &student_id);
        tokio::time::sleep(duration).await;

        teacher.hang_up().await?;
        wait_for(student, |v| v.call_state == CallState::Idle).await?;
        println!("hung up on {}", &student_id);
    }
    Ok(())
}

async fn wait_for(client: &CallClient, check: impl Fn(&ClientView) -> bool) -> Result<()> {
    let Some(mut rx) = client.watch() else {
        bail!("device is not registered");
    };
    let waited = tokio::time::timeout(Duration::from_secs(30), async {
        while !check(&client.view()) {
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    if waited.is_err() || !check(&client.view()) {
        bail!("timed out waiting for {:?}", client.view().call_state);
    }
    Ok(())
}

fn device(directory: &Directory, bus: &InProcessBus, config: &CallConfig) -> Result<CallClient> {
    // remote tracks are only counted here. a real application would decode them
    let (remote_track_tx, mut remote_track_rx) = mpsc::unbounded_channel::<RemoteTrackAdded>();
    tokio::spawn(async move {
        while let Some(added) = remote_track_rx.recv().await {
            log::info!(
                "receiving {} from {}",
                added.track.codec().await.capability.mime_type,
                &added.peer
            );
        }
    });

    let (transport, inputs) = WebRtcTransport::init(InitArgs {
        ice_servers: config.ice_servers.clone(),
        remote_track_chan: Some(remote_track_tx),
    })?;
    tokio::spawn(simulate_capture(inputs.camera_tx, 96, 90000 / 30, Duration::from_millis(33)));
    tokio::spawn(simulate_capture(inputs.microphone_tx, 111, 960, Duration::from_millis(20)));

    Ok(CallClient::new(CallClientInit {
        directory: directory.clone(),
        bus: Arc::new(bus.clone()),
        transport: Arc::new(transport),
        config: config.clone(),
    }))
}

/// sends an empty packet every `interval` until the transport goes away
async fn simulate_capture(
    tx: mpsc::UnboundedSender<rtp::packet::Packet>,
    payload_type: u8,
    timestamp_step: u32,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut sequence_number: u16 = 0;
    let mut timestamp: u32 = 0;
    loop {
        ticker.tick().await;
        let packet = rtp::packet::Packet {
            header: rtp::header::Header {
                version: 2,
                payload_type,
                sequence_number,
                timestamp,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0u8; 4]),
        };
        if tx.send(packet).is_err() {
            return;
        }
        sequence_number = sequence_number.wrapping_add(1);
        timestamp = timestamp.wrapping_add(timestamp_step);
    }
}
