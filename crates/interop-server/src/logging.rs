//! Request logging
//!
//! One structured line per inbound Backend Interfaces request.

use std::time::Instant;

use serde::Serialize;
use tracing::info;

/// Inbound request log entry
#[derive(Debug, Serialize)]
pub struct InteropRequestLog {
    /// Timestamp in RFC 3339 format
    pub timestamp: String,
    pub correlation_id: String,
    pub remote_addr: Option<String>,
    pub protocol_version: Option<String>,
    pub message_type: Option<String>,
    pub transaction_id: Option<u32>,
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    /// Wire result code of the answer
    pub result_code: Option<String>,
    pub http_status: u16,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl InteropRequestLog {
    /// Create a new request log builder
    pub fn builder(correlation_id: impl Into<String>) -> InteropRequestLogBuilder {
        InteropRequestLogBuilder {
            correlation_id: correlation_id.into(),
            start_time: Instant::now(),
            remote_addr: None,
            protocol_version: None,
            message_type: None,
            transaction_id: None,
            sender_id: None,
            receiver_id: None,
            result_code: None,
            error: None,
        }
    }
}

/// Builder for request logs
#[derive(Debug)]
pub struct InteropRequestLogBuilder {
    correlation_id: String,
    start_time: Instant,
    remote_addr: Option<String>,
    protocol_version: Option<String>,
    message_type: Option<String>,
    transaction_id: Option<u32>,
    sender_id: Option<String>,
    receiver_id: Option<String>,
    result_code: Option<String>,
    error: Option<String>,
}

impl InteropRequestLogBuilder {
    pub fn remote_addr(&mut self, addr: impl ToString) -> &mut Self {
        self.remote_addr = Some(addr.to_string());
        self
    }

    /// Record the fields of a parsed header
    pub fn header(&mut self, header: &interop_common::MessageHeader) -> &mut Self {
        self.protocol_version = Some(header.protocol_version.to_string());
        self.message_type = Some(header.message_type.clone());
        self.transaction_id = Some(header.transaction_id);
        self.sender_id = Some(header.sender_id.clone());
        self.receiver_id = Some(header.receiver_id.clone());
        self
    }

    pub fn result_code(&mut self, code: impl Into<String>) -> &mut Self {
        self.result_code = Some(code.into());
        self
    }

    pub fn error(&mut self, err: impl ToString) -> &mut Self {
        self.error = Some(err.to_string());
        self
    }

    pub fn recorded_result_code(&self) -> Option<&str> {
        self.result_code.as_deref()
    }

    pub fn message_type(&self) -> Option<&str> {
        self.message_type.as_deref()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Finalize and log the request
    pub fn finish(self, http_status: u16) -> InteropRequestLog {
        let duration_ms = self.start_time.elapsed().as_millis() as u64;
        let log = InteropRequestLog {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: self.correlation_id,
            remote_addr: self.remote_addr,
            protocol_version: self.protocol_version,
            message_type: self.message_type,
            transaction_id: self.transaction_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            result_code: self.result_code,
            http_status,
            duration_ms,
            error: self.error,
        };

        info!(
            correlation_id = %log.correlation_id,
            remote_addr = ?log.remote_addr,
            message_type = ?log.message_type,
            transaction_id = ?log.transaction_id,
            sender_id = ?log.sender_id,
            receiver_id = ?log.receiver_id,
            result_code = ?log.result_code,
            http_status = log.http_status,
            duration_ms = log.duration_ms,
            error = ?log.error,
            "Backend Interfaces request"
        );
        log
    }
}
