//! Encode stage: drains the receive queue on a fixed cadence, wraps each
//! record in a DLT frame, and forwards it to the storage endpoint.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use tokio::net::UdpSocket;
use tokio::select;
use tokio_util::sync::CancellationToken;

use dlt_relay::frame::{FrameHeader, LogInfo, MessageType, TypeInfo};
use dlt_relay::ingest::{LogLevel, LogRecord, MAX_DATAGRAM_LEN};

use crate::config::Config;
use crate::service::{RecordQueue, ServiceStats};

/// Drain cadence of the encode stage.
const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// The counter wraps one short of the u8 range: 254 is followed by 0 and
/// the value 255 never appears on the wire. The deployed storage tooling
/// expects this sequence.
pub const MSG_COUNTER_WRAP: u8 = 255;

pub fn next_msg_counter(counter: u8) -> u8 {
    counter.wrapping_add(1) % MSG_COUNTER_WRAP
}

fn level_log_info(level: LogLevel) -> LogInfo {
    match level {
        LogLevel::Info => LogInfo::Info,
        LogLevel::Verbose => LogInfo::Verbose,
        LogLevel::Warning => LogInfo::Warn,
        LogLevel::Error => LogInfo::Error,
        LogLevel::Fatal => LogInfo::Fatal,
    }
}

fn level_name(log_level: u8) -> &'static str {
    match LogLevel::try_from(log_level) {
        Ok(LogLevel::Info) => "info",
        Ok(LogLevel::Verbose) => "verbose",
        Ok(LogLevel::Warning) => "warning",
        Ok(LogLevel::Error) => "error",
        Ok(LogLevel::Fatal) => "fatal",
        Err(_) => "unknown",
    }
}

/// Assemble the frame header for one record from the immutable config
/// snapshot: header flags and ids from the configuration, session and
/// app/context ids from the record, the counter from the encode stage.
fn build_frame_header(
    config: &Config,
    ecu_id: [u8; 4],
    msg_counter: u8,
    level: LogLevel,
    record: &LogRecord,
    uptime: Duration,
) -> FrameHeader {
    let mut header = FrameHeader::new(TypeInfo::Strg);

    if config.htype_use_extended_hdr {
        header.standard.set_use_ext_hdr();
    }
    if config.htype_msb_first {
        header.standard.set_msb_first();
    }
    if config.htype_send_ecu_id {
        header.standard.set_ecu_id(ecu_id);
    }
    header.standard.set_session_id(record.session_id);
    if config.htype_send_timestamp {
        // monotonic uptime in 0.1 ms units
        header.standard.set_timestamp((uptime.as_micros() / 100) as u32);
    }
    header.standard.set_version(config.htype_version);
    header.standard.msg_counter = msg_counter;

    if config.ext_hdr_verbose_mode {
        header.extended.set_verbose();
    }
    header.extended.set_message_type(MessageType::Log);
    header.extended.set_log_info(level_log_info(level));
    header.extended.app_id = record.app_id;
    header.extended.context_id = record.ctx_id;

    header
}

fn console_line(record: &LogRecord, ecu_id: &[u8; 4], msg_counter: u8) -> String {
    format!(
        "[{}] [{}] [{}][{}] [{}] {}",
        id_display(ecu_id),
        msg_counter,
        id_display(&record.app_id),
        id_display(&record.ctx_id),
        level_name(record.log_level),
        String::from_utf8_lossy(&record.payload),
    )
}

fn id_display(id: &[u8; 4]) -> String {
    id.iter().map(|&b| b as char).collect()
}

/// Encode-and-forward loop. Drains everything the receive stage queued,
/// then encodes and sends without holding the queue lock. The counter
/// advances once per emitted frame; dropped records never consume a
/// counter value, so the emitted stream is gap-free.
pub async fn run_forward_task(
    config: Config,
    ecu_id: [u8; 4],
    queue: Arc<RecordQueue>,
    stats: Arc<ServiceStats>,
    storage_socket: UdpSocket,
    shutdown: CancellationToken,
) {
    let storage_addr = format!(
        "{}:{}",
        config.network.storage_server.server_address, config.network.storage_server.server_port
    );
    let started = Instant::now();
    let mut msg_counter: u8 = 0;
    let mut enc_buf = [0u8; MAX_DATAGRAM_LEN];
    let mut interval = tokio::time::interval(DRAIN_INTERVAL);

    loop {
        select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        for record in queue.drain_all().await {
            let Some(level) = record.level() else {
                stats.level_drops.fetch_add(1, Ordering::Relaxed);
                debug!("dropping record with unknown log level {}", record.log_level);
                continue;
            };

            let header = build_frame_header(
                &config,
                ecu_id,
                msg_counter,
                level,
                &record,
                started.elapsed(),
            );
            let len = match header.encode(&record.payload, &mut enc_buf) {
                Ok(len) => len,
                Err(e) => {
                    stats.encode_drops.fetch_add(1, Ordering::Relaxed);
                    debug!("failed to encode record: {e}");
                    continue;
                }
            };

            // the frame exists at this point, so the counter advances
            // even if the storage endpoint is unreachable
            if let Err(e) = storage_socket.send_to(&enc_buf[..len], &storage_addr).await {
                stats.send_failures.fetch_add(1, Ordering::Relaxed);
                debug!("failed to forward frame to {storage_addr}: {e}");
            }

            if config.log_to_console {
                eprintln!("{}", console_line(&record, &ecu_id, msg_counter));
            }

            stats.emitted.fetch_add(1, Ordering::Relaxed);
            msg_counter = next_msg_counter(msg_counter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dlt_relay::frame::{
        HTYPE_MSB_FIRST, HTYPE_USE_EXT_HEADER, HTYPE_WITH_ECU_ID, HTYPE_WITH_SESSION_ID,
        HTYPE_WITH_TIMESTAMP,
    };

    fn test_config() -> Config {
        let mut config = Config::default();
        config.htype_ecu_id = "ECU1".to_string();
        config.network.storage_server.server_address = "127.0.0.1".to_string();
        config.network.storage_server.server_port = 14400;
        config
    }

    fn test_record(level: LogLevel) -> LogRecord {
        LogRecord::new(level, "APP1", "CTX1", *b"SESS", b"boom".to_vec())
    }

    #[test]
    fn test_counter_wraps_without_emitting_255() {
        assert_eq!(next_msg_counter(0), 1);
        assert_eq!(next_msg_counter(253), 254);
        assert_eq!(next_msg_counter(254), 0);

        let mut counter = 0u8;
        let mut seen = Vec::new();
        for _ in 0..256 {
            seen.push(counter);
            counter = next_msg_counter(counter);
        }
        assert_eq!(seen[0..255], (0..=254).collect::<Vec<u8>>()[..]);
        assert_eq!(seen[255], 0);
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_log_info(LogLevel::Info), LogInfo::Info);
        assert_eq!(level_log_info(LogLevel::Verbose), LogInfo::Verbose);
        assert_eq!(level_log_info(LogLevel::Warning), LogInfo::Warn);
        assert_eq!(level_log_info(LogLevel::Error), LogInfo::Error);
        assert_eq!(level_log_info(LogLevel::Fatal), LogInfo::Fatal);
    }

    #[test]
    fn test_build_frame_header_from_config() {
        let config = test_config();
        let record = test_record(LogLevel::Info);
        let header = build_frame_header(
            &config,
            *b"ECU1",
            5,
            LogLevel::Info,
            &record,
            Duration::from_millis(1),
        );
        assert_eq!(
            header.standard.header_type,
            HTYPE_USE_EXT_HEADER | HTYPE_WITH_ECU_ID | HTYPE_WITH_SESSION_ID | (1 << 5)
        );
        assert_eq!(header.standard.msg_counter, 5);
        assert_eq!(header.standard.ecu_id, *b"ECU1");
        assert_eq!(header.standard.session_id, *b"SESS");
        assert!(header.extended.is_verbose());
        assert_eq!(header.extended.message_type(), Some(MessageType::Log));
        assert_eq!(header.extended.log_info(), Some(LogInfo::Info));
        assert_eq!(header.extended.app_id, *b"APP1");
        assert_eq!(header.extended.context_id, *b"CTX1");
    }

    #[test]
    fn test_timestamp_in_decimillisecond_units() {
        let mut config = test_config();
        config.htype_send_timestamp = true;
        config.htype_msb_first = true;
        let record = test_record(LogLevel::Warning);
        let header = build_frame_header(
            &config,
            *b"ECU1",
            0,
            LogLevel::Warning,
            &record,
            Duration::from_millis(250),
        );
        assert!(header.standard.header_type & HTYPE_WITH_TIMESTAMP != 0);
        assert!(header.standard.header_type & HTYPE_MSB_FIRST != 0);
        assert_eq!(header.standard.timestamp, 2500);
    }

    #[test]
    fn test_console_line_format() {
        let record = test_record(LogLevel::Fatal);
        assert_eq!(
            console_line(&record, b"ECU1", 0),
            "[ECU1] [0] [APP1][CTX1] [fatal] boom"
        );
    }

    #[test]
    fn test_console_line_unknown_level() {
        let mut record = test_record(LogLevel::Info);
        record.log_level = 99;
        assert!(console_line(&record, b"ECU1", 3).contains("[unknown]"));
    }
}
