//! Observation of a single attempt.
//!
//! [`InstrumentedHandler`] sits between the transport and the caller's
//! handler. It drives a [`ProgressTimer`] from the transport's events and,
//! when the attempt ends, emits exactly one [`ProfilingRecord`]. It never
//! alters what the wrapped handler returns.

use crate::profiling::{AttemptContext, ProfilingRecord, ProfilingSink, NO_RESPONSE_CODE};
use crate::transport::{LifecycleListener, Transport};
use crate::{AsyncHandler, HandlerState, LifecycleEvent, ProgressTimer, Request, Response, Result};

/// Wraps a handler for the duration of one attempt.
pub struct InstrumentedHandler<'a, H> {
    inner: &'a mut H,
    timer: ProgressTimer,
    request: &'a Request,
    context: AttemptContext,
    sink: &'a dyn ProfilingSink,
}

impl<'a, H: AsyncHandler> InstrumentedHandler<'a, H> {
    /// Wraps `inner` for the attempt described by `context`.
    pub fn new(
        inner: &'a mut H,
        request: &'a Request,
        context: AttemptContext,
        sink: &'a dyn ProfilingSink,
    ) -> Self {
        Self {
            inner,
            timer: ProgressTimer::new(),
            request,
            context,
            sink,
        }
    }

    /// Ends the attempt with the transport's outcome.
    ///
    /// Emits the profiling record, then hands the outcome to the wrapped
    /// handler and returns whatever it produces, together with the raw
    /// response code (`-1` if the transport failed).
    pub fn finish(mut self, outcome: Result<Response>) -> (Result<H::Output>, i32) {
        let terminal = match &outcome {
            Ok(_) => LifecycleEvent::Completed,
            Err(_) => LifecycleEvent::Failed,
        };
        self.timer.on_event(terminal);

        let record = ProfilingRecord::new(
            self.request,
            outcome.as_ref().ok(),
            self.context,
            self.timer.progress(),
        );
        if let Err(e) = self.sink.emit(&record) {
            tracing::debug!(error = %e, "Dropping profiling record");
        }
        self.timer.reset();

        match outcome {
            Ok(response) => {
                let status = i32::from(response.status_code());
                (self.inner.on_completed(response), status)
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    attempt = self.context.attempt,
                    method = %self.request.method(),
                    url = %self.request.url(),
                    "Request failed"
                );
                self.inner.on_failed(&error);
                (Err(error), NO_RESPONSE_CODE)
            }
        }
    }
}

impl<H: AsyncHandler> LifecycleListener for InstrumentedHandler<'_, H> {
    fn on_event(&mut self, event: LifecycleEvent) -> HandlerState {
        tracing::debug!(?event, attempt = self.context.attempt, "Transport event");
        self.timer.on_event(event);
        self.inner.on_event(event)
    }
}

/// Runs one instrumented attempt of `request` through `transport`.
pub(crate) async fn execute_attempt<H: AsyncHandler>(
    transport: &dyn Transport,
    request: &Request,
    handler: &mut H,
    context: AttemptContext,
    sink: &dyn ProfilingSink,
) -> (Result<H::Output>, i32) {
    let mut instrumented = InstrumentedHandler::new(handler, request, context, sink);
    let outcome = transport.execute(request, &mut instrumented).await;
    instrumented.finish(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, ScriptedTransport};
    use crate::{Error, ErrorKind, InstrumentationError, ResponseHandler};

    struct FailingSink;

    impl ProfilingSink for FailingSink {
        fn emit(&self, _record: &ProfilingRecord) -> std::result::Result<(), InstrumentationError> {
            Err(InstrumentationError::Sink("disk full".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        events: Vec<LifecycleEvent>,
        failures: usize,
        abort_on: Option<LifecycleEvent>,
    }

    impl AsyncHandler for CountingHandler {
        type Output = u16;

        fn on_event(&mut self, event: LifecycleEvent) -> HandlerState {
            self.events.push(event);
            if self.abort_on == Some(event) {
                HandlerState::Abort
            } else {
                HandlerState::Continue
            }
        }

        fn on_completed(&mut self, response: Response) -> Result<u16> {
            Ok(response.status_code())
        }

        fn on_failed(&mut self, _error: &Error) {
            self.failures += 1;
        }
    }

    fn request() -> Request {
        Request::get("http://service.test/items").unwrap()
    }

    #[tokio::test]
    async fn test_success_emits_one_record() {
        let transport = ScriptedTransport::statuses(&[201]);
        let sink = RecordingSink::default();
        let request = request();
        let mut handler = CountingHandler::default();

        let (result, code) = execute_attempt(
            &transport,
            &request,
            &mut handler,
            AttemptContext::first(),
            &sink,
        )
        .await;

        assert_eq!(result.unwrap(), 201);
        assert_eq!(code, 201);
        assert!(handler.events.contains(&LifecycleEvent::HeadersReceived));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resp_code, 201);
        assert_eq!(records[0].req_status, "single");
        assert!(records[0].exec_info.is_monotonic());
    }

    #[tokio::test]
    async fn test_failure_records_sentinel_and_keeps_error() {
        let transport = ScriptedTransport::errors(&[ErrorKind::Connect]);
        let sink = RecordingSink::default();
        let request = request();
        let mut handler = CountingHandler::default();

        let (result, code) = execute_attempt(
            &transport,
            &request,
            &mut handler,
            AttemptContext::retry(2, 503),
            &sink,
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Connect);
        assert_eq!(code, NO_RESPONSE_CODE);
        assert_eq!(handler.failures, 1);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resp_code, -1);
        assert_eq!(records[0].req_status, "single|retry:503");
    }

    #[tokio::test]
    async fn test_abort_state_reaches_transport() {
        let transport = ScriptedTransport::statuses(&[200]);
        let sink = RecordingSink::default();
        let request = request();
        let mut handler = CountingHandler {
            abort_on: Some(LifecycleEvent::HeadersWritten),
            ..CountingHandler::default()
        };

        let (result, _) = execute_attempt(
            &transport,
            &request,
            &mut handler,
            AttemptContext::first(),
            &sink,
        )
        .await;

        assert!(matches!(result, Err(Error::Aborted)));
        assert!(!handler.events.contains(&LifecycleEvent::HeadersReceived));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_change_result() {
        let transport = ScriptedTransport::statuses(&[404]);
        let request = request();
        let mut handler = ResponseHandler;

        let (result, code) = execute_attempt(
            &transport,
            &request,
            &mut handler,
            AttemptContext::first(),
            &FailingSink,
        )
        .await;

        assert_eq!(result.unwrap().status_code(), 404);
        assert_eq!(code, 404);
    }
}
