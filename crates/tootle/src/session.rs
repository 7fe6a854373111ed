//! Per-connection protocol state machine.
//!
//! A connection is Idle until a request arrives. `stream-events` moves it to
//! Streaming: the prompt is built, `start` goes out, a worker is spawned, and
//! every token the worker produces is forwarded as an `event` (with a
//! `snapshot` at fixed counts) until exactly one terminal message. The
//! connection then returns to Idle with nothing carried over.
//!
//! `generate-midi` runs the generator to completion inside the handling of
//! that one request and answers with a single reply.
//!
//! Frames that arrive while a stream is running are queued and handled, in
//! order, once it finishes.

use crate::context::ServiceContext;
use crate::error::ConnectionError;
use crate::params::GenerationRequest;
use crate::prompt::build_prompt;
use crate::snapshot::{encode_snapshot, is_snapshot_point, render_midi};
use crate::worker::{generate_all, GenerationJob, WorkerHandle, WorkerMessage};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use miditok::Token;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tootleproto::{Action, GenerateReply, Request, StreamMessage};
use tracing::Instrument;
use uuid::Uuid;

/// Where outbound text frames go.
#[async_trait]
pub trait MessageSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError>;
}

/// Collects frames in memory.
#[async_trait]
impl MessageSink for Vec<String> {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.push(text);
        Ok(())
    }
}

async fn send<S, T>(sink: &mut S, message: &T) -> Result<(), ConnectionError>
where
    S: MessageSink + ?Sized,
    T: Serialize + Sync,
{
    let text = serde_json::to_string(message).map_err(|e| ConnectionError::Send(e.to_string()))?;
    sink.send_text(text).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Complete,
    Error,
}

/// One `stream-events` request in flight.
struct StreamSession {
    id: Uuid,
    state: SessionState,
    buffer: Vec<Token>,
    prompt_len: usize,
    events_sent: u64,
    request: GenerationRequest,
    worker: WorkerHandle,
    span: tracing::Span,
}

impl StreamSession {
    fn check_buffer(&self) {
        debug_assert_eq!(
            self.buffer.len(),
            self.prompt_len + self.events_sent as usize,
            "buffer must hold the prompt plus every event sent"
        );
    }
}

/// Buffer bookkeeping of the active stream, for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProgress {
    pub buffer_len: usize,
    pub prompt_len: usize,
    pub events_sent: u64,
}

/// A client frame held back until the active stream ends.
enum Inbound {
    Text(String),
    Binary,
}

const BINARY_UNSUPPORTED: &str = "Binary frames are not supported";

pub struct Connection {
    context: Arc<ServiceContext>,
    cancel: CancellationToken,
    stream: Option<StreamSession>,
    queued: VecDeque<Inbound>,
}

impl Connection {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        let cancel = context.shutdown_token().child_token();
        Self {
            context,
            cancel,
            stream: None,
            queued: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.stream
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    pub fn progress(&self) -> Option<StreamProgress> {
        self.stream.as_ref().map(|s| StreamProgress {
            buffer_len: s.buffer.len(),
            prompt_len: s.prompt_len,
            events_sent: s.events_sent,
        })
    }

    /// Cancelled when the connection is torn down or the server shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop any in-flight generation.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(stream) = self.stream.take() {
            tracing::info!(
                parent: &stream.span,
                events_sent = stream.events_sent,
                "stream abandoned"
            );
        }
    }

    /// Handle one inbound text frame.
    pub async fn handle_text<S>(&mut self, text: &str, sink: &mut S) -> Result<(), ConnectionError>
    where
        S: MessageSink + ?Sized,
    {
        if self.is_streaming() {
            tracing::debug!(queued = self.queued.len() + 1, "request queued behind active stream");
            self.queued.push_back(Inbound::Text(text.to_string()));
            return Ok(());
        }
        self.dispatch(text, sink).await
    }

    /// Binary frames are refused, after any active stream has finished.
    pub async fn handle_binary<S>(&mut self, sink: &mut S) -> Result<(), ConnectionError>
    where
        S: MessageSink + ?Sized,
    {
        if self.is_streaming() {
            self.queued.push_back(Inbound::Binary);
            return Ok(());
        }
        send(sink, &StreamMessage::error(BINARY_UNSUPPORTED)).await
    }

    async fn dispatch<S>(&mut self, text: &str, sink: &mut S) -> Result<(), ConnectionError>
    where
        S: MessageSink + ?Sized,
    {
        let request = match Request::parse(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "rejected request");
                return send(sink, &StreamMessage::error(e.to_string())).await;
            }
        };

        let resolved = match GenerationRequest::resolve(request.action, &request.params) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(action = %request.action, error = %e, "rejected params");
                return send(sink, &StreamMessage::error(e.to_string())).await;
            }
        };

        match request.action {
            Action::StreamEvents => self.start_stream(resolved, sink).await,
            Action::GenerateMidi => self.generate_midi(resolved, sink).await,
        }
    }

    async fn start_stream<S>(
        &mut self,
        request: GenerationRequest,
        sink: &mut S,
    ) -> Result<(), ConnectionError>
    where
        S: MessageSink + ?Sized,
    {
        let id = Uuid::new_v4();
        let span = tracing::info_span!(
            "ws.session.stream",
            session.id = %id,
            gen_events = request.gen_events,
            seed = request.seed,
        );

        let tokenizer = self.context.tokenizer();
        let prompt = build_prompt(tokenizer, &request);
        let params = request.sampling_params(&prompt.channels());
        let start = request.start_params(&prompt.rejected);
        if !start.rejected.is_empty() {
            tracing::warn!(parent: &span, rejected = ?start.rejected, "ignoring malformed fields");
        }
        tracing::info!(
            parent: &span,
            temp = request.temp,
            prompt_len = prompt.len(),
            "starting event stream"
        );

        send(sink, &StreamMessage::Start { params: start }).await?;

        let job = GenerationJob {
            prompt: prompt.tokens.clone(),
            gen_events: request.gen_events,
            params,
            seed: request.seed,
        };
        let session = &self.context.config().session;
        let worker = span.in_scope(|| {
            WorkerHandle::spawn(
                self.context.generator(),
                job,
                session.queue_capacity,
                self.cancel.child_token(),
            )
        });

        self.stream = Some(StreamSession {
            id,
            state: SessionState::Streaming,
            prompt_len: prompt.len(),
            buffer: prompt.tokens,
            events_sent: 0,
            request,
            worker,
            span,
        });
        Ok(())
    }

    /// Next message from the active worker. Never resolves while idle.
    pub async fn next_worker_message(&mut self) -> Option<WorkerMessage> {
        match self.stream.as_mut() {
            Some(stream) => stream.worker.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Forward one worker message to the client.
    pub async fn on_worker_message<S>(
        &mut self,
        message: Option<WorkerMessage>,
        sink: &mut S,
    ) -> Result<(), ConnectionError>
    where
        S: MessageSink + ?Sized,
    {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        let tokenizer = self.context.tokenizer();

        match message {
            Some(WorkerMessage::Event { index, token }) => {
                let event = tokenizer
                    .tokens_to_event(&token)
                    .and_then(|e| serde_json::to_value(e).ok())
                    .unwrap_or(Value::Null);
                let tokens = token.ids().to_vec();
                stream.buffer.push(token);
                stream.events_sent += 1;
                stream.check_buffer();

                send(sink, &StreamMessage::Event { index, event, tokens }).await?;
                if index % 10 == 0 {
                    tracing::debug!(parent: &stream.span, event.index = index, "events sent");
                }

                let every = self.context.config().session.snapshot_every;
                if is_snapshot_point(index, stream.request.gen_events, every) {
                    match encode_snapshot(tokenizer, &stream.buffer, index) {
                        Ok(snapshot) => {
                            if let StreamMessage::Snapshot { size_bytes, .. } = &snapshot {
                                tracing::debug!(
                                    parent: &stream.span,
                                    event.index = index,
                                    size_bytes,
                                    "snapshot sent"
                                );
                            }
                            send(sink, &snapshot).await?;
                        }
                        Err(e) => tracing::warn!(
                            parent: &stream.span,
                            event.index = index,
                            error = %e,
                            "snapshot encoding failed, skipping"
                        ),
                    }
                }
                return Ok(());
            }
            Some(WorkerMessage::Complete) => {
                stream.state = SessionState::Complete;
                tracing::info!(
                    parent: &stream.span,
                    events_sent = stream.events_sent,
                    buffer_len = stream.buffer.len(),
                    "stream complete"
                );
                send(
                    sink,
                    &StreamMessage::Complete {
                        total_events: stream.events_sent,
                    },
                )
                .await?;
            }
            Some(WorkerMessage::Error(error)) => {
                stream.state = SessionState::Error;
                tracing::warn!(parent: &stream.span, error = %error, "stream failed");
                send(sink, &StreamMessage::error(error)).await?;
            }
            None => {
                stream.state = SessionState::Error;
                tracing::error!(
                    parent: &stream.span,
                    session.id = %stream.id,
                    "worker stopped without a terminal message"
                );
                send(sink, &StreamMessage::error("generation stopped unexpectedly")).await?;
            }
        }

        self.stream = None;
        self.drain_queued(sink).await
    }

    async fn drain_queued<S>(&mut self, sink: &mut S) -> Result<(), ConnectionError>
    where
        S: MessageSink + ?Sized,
    {
        while !self.is_streaming() {
            match self.queued.pop_front() {
                Some(Inbound::Text(text)) => self.dispatch(&text, sink).await?,
                Some(Inbound::Binary) => {
                    send(sink, &StreamMessage::error(BINARY_UNSUPPORTED)).await?
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Pump the active stream until it reaches its terminal message.
    pub async fn run_stream<S>(&mut self, sink: &mut S) -> Result<(), ConnectionError>
    where
        S: MessageSink + ?Sized,
    {
        while self.is_streaming() {
            let message = self.next_worker_message().await;
            self.on_worker_message(message, sink).await?;
        }
        Ok(())
    }

    async fn generate_midi<S>(
        &mut self,
        request: GenerationRequest,
        sink: &mut S,
    ) -> Result<(), ConnectionError>
    where
        S: MessageSink + ?Sized,
    {
        let span = tracing::info_span!(
            "ws.session.generate",
            session.id = %Uuid::new_v4(),
            gen_events = request.gen_events,
            seed = request.seed,
        );
        let tokenizer = self.context.tokenizer();
        let prompt = build_prompt(tokenizer, &request);
        if !prompt.rejected.is_empty() || !request.rejected.is_empty() {
            tracing::warn!(
                parent: &span,
                rejected = ?request.start_params(&prompt.rejected).rejected,
                "ignoring malformed fields"
            );
        }

        let prompt_len = prompt.len();
        let job = GenerationJob {
            prompt: prompt.tokens.clone(),
            gen_events: request.gen_events,
            params: request.sampling_params(&prompt.channels()),
            seed: request.seed,
        };

        let generated = generate_all(self.context.generator(), job, self.cancel.child_token())
            .instrument(span.clone())
            .await;

        let reply = match generated {
            Ok(tokens) => {
                let mut buffer = prompt.tokens;
                buffer.extend(tokens);
                match render_midi(tokenizer, &buffer) {
                    Ok(midi) => {
                        tracing::info!(
                            parent: &span,
                            prompt_len,
                            generated = buffer.len() - prompt_len,
                            size_bytes = midi.len(),
                            "generated midi"
                        );
                        GenerateReply::Ok {
                            events: request.gen_events,
                            size_bytes: midi.len() as u64,
                            midi_b64: BASE64.encode(&midi),
                        }
                    }
                    Err(e) => GenerateReply::Error {
                        error: e.to_string(),
                    },
                }
            }
            Err(error) => {
                tracing::warn!(parent: &span, error = %error, "generation failed");
                GenerateReply::Error { error }
            }
        };

        send(sink, &reply).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
