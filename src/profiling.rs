//! Profiling records: one line per finished transport attempt.
//!
//! A record carries the request identity, the attempt's [`Progress`], the
//! response code (`-1` when the attempt failed) and a retry tag. The default
//! sink writes it as a TRACE event on the [`PROFILING_TARGET`] target:
//!
//! ```text
//! 2026-10-19T07:21:00.123Z time=1792394460.123, req_url=http://api/x, req_host_header=,
//! req_method=GET, exec_info={"namelookup_time":0,...}, resp_code=200, src_url=,
//! req_status=single, content_length=42, origin=,
//! ```
//!
//! Every field, the last included, is followed by `", "`. `src_url` and
//! `origin` are always empty; they keep the column layout stable for log
//! parsers.

use crate::{InstrumentationError, Progress, Request, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

/// `tracing` target the default sink writes to.
pub const PROFILING_TARGET: &str = "callgate::profiling";

/// Tag for an attempt that is not a retry.
pub const REQUEST_SINGLE: &str = "single";

/// Tag prefix for retry attempts, followed by `:<previous status>`.
pub const REQUEST_SINGLE_RETRY: &str = "single|retry";

/// Response code recorded when an attempt produced no response.
pub const NO_RESPONSE_CODE: i32 = -1;

/// Position of an attempt within its logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttemptContext {
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Response code of the previous attempt, `-1` if it failed.
    pub last_status: Option<i32>,
}

impl AttemptContext {
    /// Context of the first attempt.
    pub fn first() -> Self {
        Self::default()
    }

    /// Context of a retry following an attempt that ended with `last_status`.
    pub fn retry(attempt: u32, last_status: i32) -> Self {
        Self {
            attempt,
            last_status: Some(last_status),
        }
    }

    /// The `req_status` tag for this attempt.
    pub fn request_status(&self) -> String {
        match (self.attempt, self.last_status) {
            (0, _) => REQUEST_SINGLE.to_string(),
            (_, status) => format!(
                "{}:{}",
                REQUEST_SINGLE_RETRY,
                status.unwrap_or(NO_RESPONSE_CODE)
            ),
        }
    }
}

/// Everything known about one finished attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilingRecord {
    /// Wall-clock time the record was produced.
    pub timestamp: SystemTime,
    /// Full request URL.
    pub req_url: String,
    /// The `Host` header as sent, if set explicitly.
    pub req_host_header: Option<String>,
    /// Request method.
    pub req_method: String,
    /// Phase timings.
    pub exec_info: Progress,
    /// Response status, or `-1` if the attempt failed.
    pub resp_code: i32,
    /// `single` or `single|retry:<previous status>`.
    pub req_status: String,
    /// `Content-Length` of the response, if reported.
    pub content_length: Option<String>,
}

impl ProfilingRecord {
    /// Builds the record for a finished attempt.
    pub fn new(
        request: &Request,
        response: Option<&Response>,
        context: AttemptContext,
        progress: Progress,
    ) -> Self {
        Self {
            timestamp: SystemTime::now(),
            req_url: request.url().to_string(),
            req_host_header: request.host_header().map(str::to_string),
            req_method: request.method().to_string(),
            exec_info: progress,
            resp_code: response.map_or(NO_RESPONSE_CODE, |r| i32::from(r.status_code())),
            req_status: context.request_status(),
            content_length: response.and_then(Response::content_length).map(str::to_string),
        }
    }

    /// Returns `true` if the attempt produced a response.
    pub fn has_response(&self) -> bool {
        self.resp_code != NO_RESPONSE_CODE
    }

    /// Renders the record as a single log line.
    ///
    /// Timings that cannot be serialized are replaced by an explanation
    /// instead of dropping the whole line.
    pub fn format(&self) -> String {
        let exec_info = match serde_json::to_string(&self.exec_info) {
            Ok(json) => json,
            Err(e) => format!("unable to parse executeInfo. {}", e),
        };
        let since_epoch = self.timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();

        let mut line = String::with_capacity(256);
        // Writing into a String cannot fail.
        let _ = write!(
            line,
            "{} time={}.{:03}, req_url={}, req_host_header={}, req_method={}, exec_info={}, \
             resp_code={}, src_url=, req_status={}, content_length={}, origin=, ",
            DateTime::<Utc>::from(self.timestamp).to_rfc3339_opts(SecondsFormat::Millis, true),
            since_epoch.as_secs(),
            since_epoch.subsec_millis(),
            self.req_url,
            self.req_host_header.as_deref().unwrap_or_default(),
            self.req_method,
            exec_info,
            self.resp_code,
            self.req_status,
            self.content_length.as_deref().unwrap_or_default(),
        );
        line
    }
}

/// Destination for profiling records.
///
/// Errors are reported back to the instrumentation layer, which logs them at
/// debug level and carries on; they never affect the caller's result.
pub trait ProfilingSink: Send + Sync {
    /// Accepts one record.
    fn emit(&self, record: &ProfilingRecord) -> Result<(), InstrumentationError>;
}

/// Writes records as TRACE events on [`PROFILING_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProfilingSink;

impl ProfilingSink for TracingProfilingSink {
    fn emit(&self, record: &ProfilingRecord) -> Result<(), InstrumentationError> {
        if !tracing::enabled!(target: PROFILING_TARGET, tracing::Level::TRACE) {
            return Ok(());
        }
        tracing::trace!(target: PROFILING_TARGET, "{}", record.format());
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProfilingSink;

impl ProfilingSink for NoopProfilingSink {
    fn emit(&self, _record: &ProfilingRecord) -> Result<(), InstrumentationError> {
        Ok(())
    }
}
