//!
//! GraphQL client for the ledger indexer.
//!
//! Event subscriptions run over a `graphql-transport-ws` WebSocket; state
//! queries are plain HTTP GraphQL requests. Raw frames are decoded into typed
//! events before they leave this module, so nothing downstream ever sees the
//! loosely-typed indexer output.

use super::decode::{decode_event, decode_mission_record};
use super::types::*;
use super::{EventStream, LedgerClient};
use backoff::{ExponentialBackoff, future::retry};
use futures_util::{SinkExt, Stream, StreamExt, future};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_tungstenite::{
	connect_async,
	tungstenite::{Error as WsError, Message, client::IntoClientRequest},
};
use tracing::{debug, error, info, warn};

/// Upper bound on how long a state query keeps retrying transient failures.
const QUERY_RETRY_BUDGET: Duration = Duration::from_secs(30);

/// Ledger indexer client backed by GraphQL over HTTP and WebSocket
#[derive(Clone)]
pub struct GraphQlLedgerClient {
	/// The underlying HTTP client for GraphQL queries.
	http_client: Client,
	/// The base URL for the indexer GraphQL HTTP endpoint.
	http_url: String,
	/// The WebSocket URL for real-time subscriptions.
	ws_url: String,
	/// Whether the current subscription socket is alive.
	connected: Arc<AtomicBool>,
}

/// Outcome of interpreting a single WebSocket frame.
enum Frame {
	Event(Result<LedgerEvent, LedgerError>),
	Skip,
	End,
	/// The server terminated the subscription; yield the error, then end.
	Terminated(LedgerError),
}

/// Held by the event stream. Keeps the socket's sink half open and clears the
/// connected flag once the stream ends or is dropped.
struct SubscriptionGuard<S> {
	connected: Arc<AtomicBool>,
	_sink: S,
}

impl<S> SubscriptionGuard<S> {
	fn close(&self) {
		self.connected.store(false, Ordering::SeqCst);
	}
}

impl<S> Drop for SubscriptionGuard<S> {
	fn drop(&mut self) {
		self.close();
	}
}

impl GraphQlLedgerClient {
	/// Create a new ledger client.
	///
	/// # Arguments
	/// * `http_url` - The HTTP endpoint for GraphQL queries.
	/// * `ws_url` - The WebSocket endpoint for subscriptions.
	pub fn new(http_url: String, ws_url: String) -> Result<Self, LedgerError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			http_url,
			ws_url,
			connected: Arc::new(AtomicBool::new(false)),
		})
	}

	/// Execute a GraphQL query.
	///
	/// # Returns
	/// The JSON response from the indexer, or a `LedgerError` if the request fails.
	pub async fn execute_query(
		&self,
		query: &str,
		variables: Option<serde_json::Value>,
	) -> Result<serde_json::Value, LedgerError> {
		let request_body = json!({
			"query": query,
			"variables": variables
		});

		let response = self
			.http_client
			.post(&self.http_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::GraphQLError(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let response_json: serde_json::Value = response.json().await?;

		if let Some(errors) = response_json.get("errors") {
			return Err(LedgerError::GraphQLError(format!(
				"GraphQL errors: {}",
				errors
			)));
		}

		Ok(response_json)
	}

	/// Execute a query, retrying transport failures with exponential backoff.
	async fn execute_query_with_retry(
		&self,
		query: &str,
		variables: Option<serde_json::Value>,
	) -> Result<serde_json::Value, LedgerError> {
		let policy = ExponentialBackoff {
			max_elapsed_time: Some(QUERY_RETRY_BUDGET),
			..ExponentialBackoff::default()
		};

		retry(policy, || async {
			self.execute_query(query, variables.clone())
				.await
				.map_err(|e| match e {
					LedgerError::HttpError(_) => {
						warn!("State query failed, retrying: {}", e);
						backoff::Error::transient(e)
					}
					other => backoff::Error::permanent(other),
				})
		})
		.await
	}

	async fn query_active_missions(&self) -> Result<StateSnapshot, LedgerError> {
		let query = r#"
            query ActiveMissions {
                missions(active: true) {
                    missionId
                    title
                    description
                    missionType
                    rewardAmount
                    requiredCount
                    active
                }
            }
        "#;

		let response = self.execute_query_with_retry(query, None).await?;

		let records = response
			.get("data")
			.and_then(|data| data.get("missions"))
			.and_then(|missions| missions.as_array())
			.ok_or(LedgerError::NoData)?;

		let missions = records
			.iter()
			.map(decode_mission_record)
			.collect::<Result<Vec<_>, _>>()?;

		debug!("Fetched {} active missions", missions.len());
		Ok(StateSnapshot::Missions(missions))
	}

	/// Interpret one WebSocket message from the subscription.
	fn interpret(msg: Result<Message, WsError>, filter: &EventFilter) -> Frame {
		let text = match msg {
			Ok(Message::Text(text)) => text,
			Ok(Message::Close(frame)) => {
				info!("Ledger subscription socket closed: {:?}", frame);
				return Frame::End;
			}
			Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => return Frame::Skip,
			Ok(_) => {
				return Frame::Event(Err(LedgerError::GraphQLError(
					"Unexpected message type".to_string(),
				)));
			}
			Err(e) => {
				error!("Ledger subscription socket error: {}", e);
				return Frame::End;
			}
		};

		let parsed = match serde_json::from_str::<serde_json::Value>(&text) {
			Ok(parsed) => parsed,
			Err(e) => return Frame::Event(Err(LedgerError::JsonError(e))),
		};

		let Some(msg_type) = parsed.get("type").and_then(|t| t.as_str()) else {
			return Frame::Event(Err(LedgerError::GraphQLError(
				"Message missing type field".to_string(),
			)));
		};

		match msg_type {
			"next" => {
				let Some(event_data) = parsed
					.get("payload")
					.and_then(|p| p.get("data"))
					.and_then(|d| d.get("ledgerEvents"))
				else {
					return Frame::Event(Err(LedgerError::NoData));
				};

				let raw = match serde_json::from_value::<RawLedgerEvent>(event_data.clone()) {
					Ok(raw) => raw,
					Err(e) => {
						error!(
							"Failed to deserialize ledger event: {}. Raw data was: {}",
							e, event_data
						);
						return Frame::Event(Err(LedgerError::JsonError(e)));
					}
				};

				match decode_event(raw) {
					Ok(event) if filter.accepts(event.kind()) => Frame::Event(Ok(event)),
					Ok(event) => {
						debug!("Ignoring {} outside the subscription filter", event.kind());
						Frame::Skip
					}
					Err(e) => Frame::Event(Err(LedgerError::DecodeError(e))),
				}
			}
			"error" => {
				let error_msg = parsed
					.get("payload")
					.and_then(|p| p.as_array())
					.and_then(|errors| errors.first())
					.or_else(|| parsed.get("payload"))
					.and_then(|p| p.get("message"))
					.and_then(|m| m.as_str())
					.unwrap_or("Unknown subscription error");
				error!("Ledger subscription terminated by server: {}", error_msg);
				Frame::Terminated(LedgerError::SessionError(error_msg.to_string()))
			}
			"complete" => {
				info!("Ledger event subscription completed by server");
				Frame::End
			}
			_ => {
				debug!("Ignoring message type: {}", msg_type);
				Frame::Skip
			}
		}
	}

	/// Turn the socket's receive half into decoded events.
	///
	/// The stream ends on close, socket error or `complete`. A server `error`
	/// frame is yielded once and then ends the stream, since the subscription
	/// is gone for good.
	fn event_stream<R, S>(frames: R, filter: EventFilter, guard: SubscriptionGuard<S>) -> EventStream
	where
		R: Stream<Item = Result<Message, WsError>> + Send + 'static,
		S: Send + 'static,
	{
		let stream = frames
			.map(move |msg| Self::interpret(msg, &filter))
			.scan((guard, false), |(guard, terminated), frame| {
				if *terminated {
					return future::ready(None);
				}
				let item = match frame {
					Frame::Event(event) => Some(Some(event)),
					Frame::Skip => Some(None),
					Frame::End => {
						guard.close();
						None
					}
					Frame::Terminated(e) => {
						guard.close();
						*terminated = true;
						Some(Some(Err(e)))
					}
				};
				future::ready(item)
			})
			.filter_map(future::ready);

		Box::pin(stream)
	}
}

#[async_trait::async_trait]
impl LedgerClient for GraphQlLedgerClient {
	/// Subscribe to ledger events of the kinds named in `filter`.
	///
	/// # Errors
	/// Returns `LedgerError` if the WebSocket connection or subscription handshake fails.
	async fn subscribe(&self, filter: &EventFilter) -> Result<EventStream, LedgerError> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		// Create WebSocket request with required subprotocol
		let mut request = self.ws_url.clone().into_client_request()?;
		request.headers_mut().insert(
			"Sec-WebSocket-Protocol",
			"graphql-transport-ws".parse().map_err(|_| {
				LedgerError::GraphQLError("Invalid WebSocket subprotocol header value".to_string())
			})?,
		);

		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let init_message = json!({
			"type": "connection_init"
		});
		ws_sender
			.send(Message::Text(init_message.to_string()))
			.await?;

		// Wait for connection ack
		match ws_receiver.next().await {
			Some(msg) => match msg? {
				Message::Text(text) => {
					let parsed: serde_json::Value = serde_json::from_str(&text)?;
					if parsed.get("type").and_then(|t| t.as_str()) != Some("connection_ack") {
						return Err(LedgerError::SessionError(
							"Connection not acknowledged".to_string(),
						));
					}
				}
				_ => {
					return Err(LedgerError::SessionError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			},
			None => {
				return Err(LedgerError::SessionError(
					"Socket closed during handshake".to_string(),
				));
			}
		}

		let kinds: Vec<&str> = filter.kinds.iter().map(|kind| kind.as_str()).collect();
		let start_message = json!({
			"id": "ledger-events",
			"type": "subscribe",
			"payload": {
				"query": r#"
                    subscription LedgerEvents($kinds: [String!]!) {
                        ledgerEvents(kinds: $kinds) {
                            kind
                            blockNumber
                            eventIndex
                            transactionHash
                            timestamp
                            data
                        }
                    }
                "#,
				"variables": { "kinds": kinds }
			}
		});

		ws_sender
			.send(Message::Text(start_message.to_string()))
			.await?;

		self.connected.store(true, Ordering::SeqCst);
		info!("Subscribed to {} ledger event kinds", kinds.len());

		let guard = SubscriptionGuard {
			connected: self.connected.clone(),
			_sink: ws_sender,
		};
		Ok(Self::event_stream(ws_receiver, filter.clone(), guard))
	}

	async fn query_state(&self, resource: StateResource) -> Result<StateSnapshot, LedgerError> {
		match resource {
			StateResource::ActiveMissions => self.query_active_missions().await,
		}
	}

	async fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}
}
