//! Test doubles shared by the unit tests.

use crate::profiling::{ProfilingRecord, ProfilingSink};
use crate::transport::{notify, LifecycleListener, Transport, TransportFuture};
use crate::{Error, ErrorKind, InstrumentationError, LifecycleEvent, Request, Response};
use http::{HeaderMap, StatusCode};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    Status(u16),
    Fail(ErrorKind),
}

/// Replays a fixed script of outcomes; the last step repeats forever.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    body: Vec<u8>,
    closed: AtomicBool,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            delay: None,
            body: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn statuses(statuses: &[u16]) -> Self {
        Self::new(statuses.iter().copied().map(Step::Status).collect())
    }

    pub(crate) fn errors(kinds: &[ErrorKind]) -> Self {
        Self::new(kinds.iter().copied().map(Step::Fail).collect())
    }

    /// Waits this long between writing the request and receiving headers.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn with_body(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut last = self.last.lock().unwrap();
        if let Some(step) = self.script.lock().unwrap().pop_front() {
            *last = Some(step);
        }
        last.unwrap_or(Step::Status(200))
    }
}

impl Transport for ScriptedTransport {
    fn execute<'a>(
        &'a self,
        request: &'a Request,
        listener: &'a mut (dyn LifecycleListener + Send),
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(Error::ClientClosed);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.next_step();

            notify(listener, LifecycleEvent::Started)?;
            notify(listener, LifecycleEvent::DnsResolved)?;
            notify(listener, LifecycleEvent::ConnectionOpened)?;
            notify(listener, LifecycleEvent::HeadersWritten)?;
            if request.body().is_some() {
                notify(listener, LifecycleEvent::BodyWritten)?;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match step {
                Step::Status(code) => {
                    notify(listener, LifecycleEvent::HeadersReceived)?;
                    let status = StatusCode::from_u16(code).unwrap();
                    Ok(Response::new(status, HeaderMap::new(), self.body.clone()))
                }
                Step::Fail(kind) => Err(Error::Transport {
                    kind,
                    message: "scripted failure".to_string(),
                }),
            }
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Keeps every record it receives.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    records: Arc<Mutex<Vec<ProfilingRecord>>>,
}

impl RecordingSink {
    pub(crate) fn records(&self) -> Vec<ProfilingRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ProfilingSink for RecordingSink {
    fn emit(&self, record: &ProfilingRecord) -> Result<(), InstrumentationError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
