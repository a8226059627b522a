//! salsify-sender: read frames from a YUV4MPEG2 file, encode
//! speculatively, and pace fragments onto a UDP socket.

use std::fs::File;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use salsify_codec::{Encoder, EncoderQuality};
use salsify_controller::{EncodePool, OperationMode, SenderController};
use salsify_core::RasterPool;
use salsify_formats::{FrameInput, Y4mReader};
use salsify_transport::{fragment_frame, inter_send_delay_us, Ack, AverageEncodingTime, Pacer};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Salsify sender: loss-adaptive real-time video over UDP.
#[derive(Parser, Debug)]
#[command(name = "salsify-sender")]
#[command(about = "Encode a Y4M stream and send it to a salsify receiver", long_about = None)]
#[command(version)]
struct Cli {
    /// Input video (YUV4MPEG2)
    input: PathBuf,

    /// Base y_ac quantizer index (0-127)
    quantizer: u8,

    /// Receiver host
    host: String,

    /// Receiver port
    port: u16,

    /// Connection id echoed by every packet of this session
    connection_id: u16,

    /// Operation mode: s1, s2 or conventional
    #[arg(short, long, default_value = "s2")]
    mode: String,

    /// Camera device (accepted for compatibility; file input is used)
    #[arg(short, long)]
    device: Option<String>,

    /// Camera pixel format: NV12, YUYV, YU12 or MJPG (compatibility)
    #[arg(short, long)]
    pixfmt: Option<String>,

    /// Conventional-mode quality updates per second
    #[arg(short, long, default_value = "1")]
    update_rate: u32,

    /// Periodically report resident memory on stderr
    #[arg(long)]
    log_mem_usage: bool,

    /// Enable verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_mode(mode: &str) -> Result<OperationMode> {
    match mode {
        "s1" => Ok(OperationMode::S1),
        "s2" => Ok(OperationMode::S2),
        "conventional" => Ok(OperationMode::Conventional),
        other => bail!("unknown operation mode {other:?}"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    salsify_cli::init_logging(cli.verbose);

    let mode = parse_mode(&cli.mode)?;
    if cli.device.is_some() || cli.pixfmt.is_some() {
        warn!("camera capture is handled by an external collaborator; reading from the input file");
    }

    let input_file =
        File::open(&cli.input).with_context(|| format!("opening {}", cli.input.display()))?;
    let mut input = Y4mReader::new(input_file).context("parsing Y4M header")?;
    let width = input.display_width();
    let height = input.display_height();
    info!(width, height, ?mode, "sender starting");

    let socket = UdpSocket::bind("0.0.0.0:0").context("binding UDP socket")?;
    socket
        .connect((cli.host.as_str(), cli.port))
        .with_context(|| format!("connecting to {}:{}", cli.host, cli.port))?;
    socket.set_nonblocking(true)?;

    // the raster pool is constructed here and passed to every consumer
    let pool = RasterPool::new(width, height);
    let base_encoder = Encoder::new(width, height, false, EncoderQuality::Realtime, &pool)?;
    let mut controller = SenderController::new(base_encoder, mode, cli.update_rate, Instant::now());
    let mut encode_pool = EncodePool::new();
    let mut pacer = Pacer::new();

    let mut input_done = false;
    let mut last_first_fragment: Option<Instant> = None;
    let mut next_mem_report = Instant::now();
    let mut ack_buffer = [0u8; 2048];
    let epoch = Instant::now();
    let mut avg_encoding_time = AverageEncodingTime::new();

    // prime the pipeline with the first captured frame
    dispatch_next_frame(&mut input, &pool, &mut controller, &mut encode_pool, &mut input_done)?;

    loop {
        if input_done && !encode_pool.busy() && pacer.is_empty() {
            info!("end of input; exiting");
            let summary = serde_json::json!({
                "connection_id": cli.connection_id,
                "frames_sent": controller.frame_no(),
                "avg_encode_us": avg_encoding_time.value_us(),
                "avg_delay_us": controller.capacity.avg_delay_us(),
            });
            eprintln!("{summary}");
            return Ok(());
        }

        // 1. wait for finished encodes, bounded by the pacer deadline
        let timeout = pacer
            .time_until_due(Instant::now())
            .min(Duration::from_millis(50));
        match encode_pool.wait_batch(timeout) {
            Ok(Some(outputs)) => {
                avg_encoding_time.add(salsify_cli::micros_since(epoch));
                debug!(avg_encode_ms = avg_encoding_time.value_us() / 1000, "encode batch done");
                if let Some(selected) = controller.select_output(outputs) {
                    let now = Instant::now();
                    let gap_us = last_first_fragment
                        .map(|t| now.duration_since(t).as_micros() as u32)
                        .unwrap_or(0);
                    last_first_fragment = Some(now);

                    let fragments = fragment_frame(
                        &selected.bytes,
                        cli.connection_id,
                        selected.source_minihash,
                        selected.target_minihash,
                        selected.frame_no,
                        gap_us,
                    )?;
                    controller.frame_sent(fragments.len() as u16);

                    let delay = inter_send_delay_us(
                        controller.capacity.avg_delay_us().unwrap_or(u32::MAX),
                    );
                    for fragment in &fragments {
                        pacer.push(fragment.serialize(), delay, now);
                    }
                    debug!(
                        frame_no = selected.frame_no,
                        fragments = fragments.len(),
                        delay_us = delay,
                        "frame queued"
                    );
                }

                dispatch_next_frame(
                    &mut input,
                    &pool,
                    &mut controller,
                    &mut encode_pool,
                    &mut input_done,
                )?;
            }
            Ok(None) => {}
            Err(error) => bail!("encode pool failed: {error}"),
        }

        // 2. one sendmsg-style burst of everything currently due
        for packet in pacer.pop_due(Instant::now()) {
            match socket.send(&packet) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("socket send"),
            }
        }

        // 3. drain acks
        loop {
            match socket.recv(&mut ack_buffer) {
                Ok(length) => match Ack::parse(&ack_buffer[..length]) {
                    Ok(ack) if ack.connection_id == cli.connection_id => {
                        controller.process_ack(&ack);
                    }
                    Ok(_) => debug!("ignoring ack for another session"),
                    Err(error) => debug!(%error, "dropping malformed ack"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("socket recv"),
            }
        }

        if cli.log_mem_usage && next_mem_report <= Instant::now() {
            if let Some(kb) = salsify_cli::memory_usage_kb() {
                eprintln!("<mem = {kb} kB>");
            }
            next_mem_report = Instant::now() + Duration::from_secs(5);
        }
    }
}

/// Pull one frame from the input and hand it to the encode pool; notes EOF.
fn dispatch_next_frame(
    input: &mut Y4mReader<File>,
    pool: &RasterPool,
    controller: &mut SenderController,
    encode_pool: &mut EncodePool,
    input_done: &mut bool,
) -> Result<()> {
    if *input_done || encode_pool.busy() {
        return Ok(());
    }
    match input.next_frame(pool)? {
        Some(raster) => {
            controller.dispatch(encode_pool, Arc::new(raster), Instant::now())?;
        }
        None => *input_done = true,
    }
    Ok(())
}

