// Copyright 2025 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request/response correlation over the framed transport
//!
//! A single reader task demultiplexes inbound frames by shape: requests are
//! posted to a bounded handler pool, responses wake the matching waiter,
//! notifications run inline on the reader. A writer lock keeps outbound
//! frames whole.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::{Message, MessageKind, RequestId, ResponseError};
use super::transport;
use crate::error::{BridgeError, Result};

/// Concurrent inbound request handlers. Keeps a slow server (chatty
/// progress creation, configuration polling) from starving the reader.
const HANDLER_POOL_SIZE: usize = 8;

pub type HandlerResult = std::result::Result<Value, ResponseError>;
pub type RequestHandler = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
pub type NotifyHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

type BoxReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Message>>>>;
type HandlerMap<H> = Arc<Mutex<HashMap<String, H>>>;

/// Duplex JSON-RPC dispatcher.
///
/// Ids are allocated monotonically from 1 and never reused within a
/// session. Every outbound request installs exactly one waiter; the waiter
/// slot is released when the response arrives or when the session closes.
pub struct Dispatcher {
	writer: SharedWriter,
	pending: PendingMap,
	next_id: AtomicI64,
	request_handlers: HandlerMap<RequestHandler>,
	notify_handlers: HandlerMap<NotifyHandler>,
	closed: Arc<AtomicBool>,
	reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
	/// Wrap a byte-stream pair and start the reader task.
	pub fn new<R, W>(reader: R, writer: W) -> Arc<Self>
	where
		R: AsyncRead + Send + Unpin + 'static,
		W: AsyncWrite + Send + Unpin + 'static,
	{
		let dispatcher = Arc::new(Self {
			writer: Arc::new(tokio::sync::Mutex::new(
				Box::new(writer) as Box<dyn AsyncWrite + Send + Unpin>
			)),
			pending: Arc::new(Mutex::new(HashMap::new())),
			next_id: AtomicI64::new(1),
			request_handlers: Arc::new(Mutex::new(HashMap::new())),
			notify_handlers: Arc::new(Mutex::new(HashMap::new())),
			closed: Arc::new(AtomicBool::new(false)),
			reader_task: Mutex::new(None),
		});

		let handle = tokio::spawn(Self::reader_loop(
			BufReader::new(Box::new(reader) as Box<dyn AsyncRead + Send + Unpin>),
			dispatcher.writer.clone(),
			dispatcher.pending.clone(),
			dispatcher.request_handlers.clone(),
			dispatcher.notify_handlers.clone(),
			dispatcher.closed.clone(),
		));
		*dispatcher.reader_task.lock().unwrap() = Some(handle);

		dispatcher
	}

	/// Register a handler for a server-initiated request method.
	pub fn on_request<F>(&self, method: &str, handler: F)
	where
		F: Fn(Option<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
	{
		self.request_handlers
			.lock()
			.unwrap()
			.insert(method.to_string(), Arc::new(handler));
	}

	/// Register a handler for a server-initiated notification method.
	pub fn on_notify<F>(&self, method: &str, handler: F)
	where
		F: Fn(Option<Value>) + Send + Sync + 'static,
	{
		self.notify_handlers
			.lock()
			.unwrap()
			.insert(method.to_string(), Arc::new(handler));
	}

	/// Send a request and wait for its response.
	///
	/// If `ctx` cancels first, a best-effort `$/cancelRequest` is issued and
	/// `Cancelled` is returned immediately; the reader discards the eventual
	/// response when it arrives.
	pub async fn call(&self, method: &str, params: Value, ctx: &CancellationToken) -> Result<Value> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(BridgeError::SessionClosed);
		}

		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().unwrap().insert(id, tx);

		let request = Message::request(id, method, params);
		if let Err(e) = self.write(&request).await {
			self.pending.lock().unwrap().remove(&id);
			return Err(e);
		}

		tokio::select! {
			biased;

			_ = ctx.cancelled() => {
				let _ = self
					.notify("$/cancelRequest", serde_json::json!({ "id": id }))
					.await;
				Err(BridgeError::Cancelled)
			}

			resp = rx => match resp {
				Ok(message) => {
					if let Some(err) = message.error {
						Err(BridgeError::Rpc { code: err.code, message: err.message })
					} else {
						Ok(message.result.unwrap_or(Value::Null))
					}
				}
				// Sender dropped without a response: the session closed.
				Err(_) => Err(BridgeError::SessionClosed),
			}
		}
	}

	/// Fire-and-forget notification.
	pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(BridgeError::SessionClosed);
		}
		self.write(&Message::notification(method, params)).await
	}

	/// Drain the writer, stop the reader and fail all outstanding waiters.
	pub async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(handle) = self.reader_task.lock().unwrap().take() {
			handle.abort();
		}
		{
			let mut writer = self.writer.lock().await;
			let _ = writer.shutdown().await;
		}
		Self::fail_pending(&self.pending);
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	#[cfg(test)]
	pub(crate) fn pending_len(&self) -> usize {
		self.pending.lock().unwrap().len()
	}

	async fn write(&self, message: &Message) -> Result<()> {
		let mut writer = self.writer.lock().await;
		match transport::write_message(&mut *writer, message).await {
			// A write failure means the child is gone; report it as such.
			Err(BridgeError::Io(_)) => Err(BridgeError::TransportClosed),
			other => other,
		}
	}

	/// Dropping the senders wakes every waiter with `SessionClosed`.
	fn fail_pending(pending: &PendingMap) {
		let drained: Vec<_> = pending.lock().unwrap().drain().collect();
		if !drained.is_empty() {
			debug!(count = drained.len(), "failing outstanding requests");
		}
	}

	async fn reader_loop(
		mut reader: BoxReader,
		writer: SharedWriter,
		pending: PendingMap,
		request_handlers: HandlerMap<RequestHandler>,
		notify_handlers: HandlerMap<NotifyHandler>,
		closed: Arc<AtomicBool>,
	) {
		let pool = Arc::new(Semaphore::new(HANDLER_POOL_SIZE));

		loop {
			let body = match transport::read_frame(&mut reader).await {
				Ok(Some(body)) => body,
				Ok(None) => {
					debug!("language server closed its output stream");
					break;
				}
				Err(e) => {
					if !closed.load(Ordering::SeqCst) {
						warn!(err = %e, "transport failure, ending session");
					}
					break;
				}
			};

			// A frame that is not valid JSON is dropped; the session lives on.
			let message: Message = match serde_json::from_slice(&body) {
				Ok(m) => m,
				Err(e) => {
					warn!(err = %e, "dropping undecodable frame");
					continue;
				}
			};

			match message.kind() {
				MessageKind::Request => {
					Self::dispatch_request(message, &writer, &request_handlers, &pool);
				}
				MessageKind::Response => {
					Self::route_response(message, &pending);
				}
				MessageKind::Notification => {
					let method = message.method.as_deref().unwrap_or_default().to_string();
					let handler = notify_handlers.lock().unwrap().get(&method).cloned();
					match handler {
						Some(h) => h(message.params),
						None => debug!(method = %method, "unhandled notification"),
					}
				}
				MessageKind::Invalid => {
					warn!("frame with neither id nor method, dropping");
				}
			}
		}

		closed.store(true, Ordering::SeqCst);
		Self::fail_pending(&pending);
	}

	/// Run a server request handler off the reader so a slow handler cannot
	/// block response delivery. Panics become `-32603` replies.
	fn dispatch_request(
		message: Message,
		writer: &SharedWriter,
		request_handlers: &HandlerMap<RequestHandler>,
		pool: &Arc<Semaphore>,
	) {
		let method = message.method.as_deref().unwrap_or_default().to_string();
		let id = match message.id {
			Some(id) => id,
			None => return,
		};
		debug!(method = %method, id = %id, "server request");

		let handler = request_handlers.lock().unwrap().get(&method).cloned();
		let writer = writer.clone();
		let pool = pool.clone();

		tokio::spawn(async move {
			let _permit = pool.acquire_owned().await;

			let reply = match handler {
				None => Message::error_response(id, ResponseError::method_not_found(&method)),
				Some(h) => {
					let outcome = AssertUnwindSafe(h(message.params)).catch_unwind().await;
					match outcome {
						Ok(Ok(value)) => Message::response(id, value),
						Ok(Err(err)) => Message::error_response(id, err),
						Err(_) => {
							warn!(method = %method, "request handler panicked");
							Message::error_response(
								id,
								ResponseError::internal("request handler panicked"),
							)
						}
					}
				}
			};

			let mut w = writer.lock().await;
			if let Err(e) = transport::write_message(&mut *w, &reply).await {
				warn!(err = %e, "failed to write reply to server request");
			}
		});
	}

	fn route_response(message: Message, pending: &PendingMap) {
		let id = match &message.id {
			Some(RequestId::Number(id)) => *id,
			other => {
				warn!(id = ?other, "response with non-numeric id");
				return;
			}
		};

		let waiter = pending.lock().unwrap().remove(&id);
		match waiter {
			// Send fails when the caller was cancelled; the response is
			// discarded by design.
			Some(tx) => {
				if tx.send(message).is_err() {
					debug!(id, "discarding response for cancelled request");
				}
			}
			None => warn!(id, "response for unknown request id"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lsp::protocol;
	use serde_json::json;
	use tokio::io::{duplex, split, AsyncRead, AsyncWrite};

	/// Minimal scripted language server living on the far end of a duplex
	/// pipe. Reads frames and lets a closure decide the reply.
	async fn run_script<R, W, F>(reader: R, mut writer: W, mut script: F)
	where
		R: AsyncRead + Send + Unpin + 'static,
		W: AsyncWrite + Send + Unpin + 'static,
		F: FnMut(Message) -> Vec<Message> + Send + 'static,
	{
		let mut reader = BufReader::new(reader);
		while let Ok(Some(body)) = transport::read_frame(&mut reader).await {
			let message: Message = serde_json::from_slice(&body).unwrap();
			for reply in script(message) {
				transport::write_message(&mut writer, &reply).await.unwrap();
			}
		}
	}

	fn pair() -> (
		Arc<Dispatcher>,
		impl AsyncRead + Send + Unpin + 'static,
		impl AsyncWrite + Send + Unpin + 'static,
	) {
		let (ours, theirs) = duplex(64 * 1024);
		let (our_read, our_write) = split(ours);
		let (their_read, their_write) = split(theirs);
		(Dispatcher::new(our_read, our_write), their_read, their_write)
	}

	#[tokio::test]
	async fn call_receives_matching_response() {
		let (dispatcher, sr, sw) = pair();
		tokio::spawn(run_script(sr, sw, |msg| {
			vec![Message::response(msg.id.unwrap(), json!({"ok": true}))]
		}));

		let ctx = CancellationToken::new();
		let result = dispatcher.call("workspace/symbol", json!({}), &ctx).await.unwrap();
		assert_eq!(result, json!({"ok": true}));
		assert_eq!(dispatcher.pending_len(), 0);
	}

	#[tokio::test]
	async fn responses_resolve_out_of_order() {
		let (dispatcher, sr, sw) = pair();
		// Hold the first request, answer it only after the second arrives.
		tokio::spawn(run_script(sr, sw, {
			let mut held: Option<Message> = None;
			move |msg| match held.take() {
				None => {
					held = Some(msg);
					vec![]
				}
				Some(first) => vec![
					Message::response(msg.id.unwrap(), json!("second")),
					Message::response(first.id.unwrap(), json!("first")),
				],
			}
		}));

		let ctx = CancellationToken::new();
		let (a, b) = tokio::join!(
			dispatcher.call("m/one", json!(1), &ctx),
			dispatcher.call("m/two", json!(2), &ctx),
		);
		assert_eq!(a.unwrap(), json!("first"));
		assert_eq!(b.unwrap(), json!("second"));
		assert_eq!(dispatcher.pending_len(), 0);
	}

	#[tokio::test]
	async fn rpc_error_is_surfaced_verbatim() {
		let (dispatcher, sr, sw) = pair();
		tokio::spawn(run_script(sr, sw, |msg| {
			vec![Message::error_response(
				msg.id.unwrap(),
				ResponseError::new(protocol::CONTENT_MODIFIED, "content modified"),
			)]
		}));

		let ctx = CancellationToken::new();
		let err = dispatcher.call("textDocument/hover", json!({}), &ctx).await.unwrap_err();
		match err {
			BridgeError::Rpc { code, message } => {
				assert_eq!(code, protocol::CONTENT_MODIFIED);
				assert_eq!(message, "content modified");
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[tokio::test]
	async fn server_request_is_answered_by_handler() {
		let (dispatcher, sr, mut sw) = pair();
		dispatcher.on_request("workspace/applyEdit", |_params| {
			async { Ok(json!({"applied": true})) }.boxed()
		});

		let (reply_tx, reply_rx) = oneshot::channel();
		tokio::spawn(async move {
			let request = Message::request(900, "workspace/applyEdit", json!({"edit": {}}));
			transport::write_message(&mut sw, &request).await.unwrap();
			let mut reader = BufReader::new(sr);
			let body = transport::read_frame(&mut reader).await.unwrap().unwrap();
			let reply: Message = serde_json::from_slice(&body).unwrap();
			reply_tx.send(reply).unwrap();
		});

		let reply = reply_rx.await.unwrap();
		assert_eq!(reply.id, Some(RequestId::Number(900)));
		assert_eq!(reply.result, Some(json!({"applied": true})));
	}

	#[tokio::test]
	async fn unknown_server_method_gets_method_not_found() {
		let (_dispatcher, sr, mut sw) = pair();

		let (reply_tx, reply_rx) = oneshot::channel();
		tokio::spawn(async move {
			let request = Message::request(7, "window/unknownThing", json!({}));
			transport::write_message(&mut sw, &request).await.unwrap();
			let mut reader = BufReader::new(sr);
			let body = transport::read_frame(&mut reader).await.unwrap().unwrap();
			let reply: Message = serde_json::from_slice(&body).unwrap();
			reply_tx.send(reply).unwrap();
		});

		let reply = reply_rx.await.unwrap();
		assert_eq!(reply.error.unwrap().code, protocol::METHOD_NOT_FOUND);
	}

	#[tokio::test]
	async fn notification_handler_runs_in_arrival_order() {
		let (dispatcher, _sr, mut sw) = pair();
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		dispatcher.on_notify("textDocument/publishDiagnostics", move |params| {
			tx.send(params.unwrap()["seq"].as_i64().unwrap()).unwrap();
		});

		for seq in 0..3 {
			let notif =
				Message::notification("textDocument/publishDiagnostics", json!({"seq": seq}));
			transport::write_message(&mut sw, &notif).await.unwrap();
		}

		for expected in 0..3 {
			assert_eq!(rx.recv().await.unwrap(), expected);
		}
	}

	#[tokio::test]
	async fn close_fails_outstanding_waiters() {
		let (dispatcher, _sr, _sw) = pair();
		let ctx = CancellationToken::new();

		let call = {
			let dispatcher = dispatcher.clone();
			let ctx = ctx.clone();
			tokio::spawn(async move { dispatcher.call("m/never", json!({}), &ctx).await })
		};
		// Let the request get written before closing.
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		dispatcher.close().await;

		let err = call.await.unwrap().unwrap_err();
		assert!(matches!(err, BridgeError::SessionClosed));
		assert_eq!(dispatcher.pending_len(), 0);
	}

	#[tokio::test]
	async fn cancellation_returns_immediately_and_notifies_server() {
		let (dispatcher, sr, sw) = pair();
		let (seen_tx, seen_rx) = oneshot::channel();
		// Never answer the request; report the cancel notification instead.
		tokio::spawn(run_script(sr, sw, {
			let mut seen_tx = Some(seen_tx);
			move |msg| {
				if msg.method.as_deref() == Some("$/cancelRequest") {
					if let Some(tx) = seen_tx.take() {
						tx.send(msg.params.unwrap()["id"].as_i64().unwrap()).unwrap();
					}
				}
				vec![]
			}
		}));

		let ctx = CancellationToken::new();
		let call = {
			let dispatcher = dispatcher.clone();
			let ctx = ctx.clone();
			tokio::spawn(async move { dispatcher.call("textDocument/references", json!({}), &ctx).await })
		};
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		ctx.cancel();

		let err = tokio::time::timeout(std::time::Duration::from_millis(100), call)
			.await
			.expect("cancellation must not block")
			.unwrap()
			.unwrap_err();
		assert!(matches!(err, BridgeError::Cancelled));
		assert_eq!(seen_rx.await.unwrap(), 1);

		// The session stays usable after a cancellation.
		assert!(!dispatcher.is_closed());
	}
}
