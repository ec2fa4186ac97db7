//! Decoding of raw ledger frames into typed events.
//!
//! The indexer renders event arguments either as a named object or as a
//! positional tuple. Both shapes are accepted; the positional order for each
//! kind is fixed by [`field_order`]. Values are validated but passed through
//! verbatim: amounts stay decimal strings, addresses stay as rendered, and
//! byte arrays become `0x`-prefixed hex.

use super::types::*;
use chrono::Utc;
use serde_json::Value;

/// Positional argument order for each event kind.
pub fn field_order(kind: EventKind) -> &'static [&'static str] {
	match kind {
		EventKind::OrderCreated => &["orderId", "buyer", "seller", "marketplaceId", "totalAmount"],
		EventKind::ProofSubmitted => &["orderId", "proofCid", "attestor"],
		EventKind::DisputeOpened => &["disputeId", "orderId", "plaintiff", "defendant"],
		EventKind::EscrowLocked | EventKind::EscrowReleased | EventKind::EscrowRefunded => {
			&["externalOrderId", "buyer", "seller", "amount"]
		}
		EventKind::MissionCreated => &[
			"missionId",
			"title",
			"description",
			"missionType",
			"rewardAmount",
			"requiredCount",
			"active",
		],
		EventKind::MissionCompleted => &["userId", "missionId", "currentCount"],
		EventKind::RewardClaimed => &["userId", "missionId", "amount"],
		EventKind::CashbackGranted => &["userId", "orderId", "orderAmount", "cashbackAmount"],
	}
}

/// Decode a raw subscription frame into a [`LedgerEvent`].
pub fn decode_event(raw: RawLedgerEvent) -> Result<LedgerEvent, DecodeError> {
	let kind = EventKind::from_name(&raw.kind).ok_or_else(|| DecodeError::UnknownKind(raw.kind.clone()))?;
	let payload = decode_payload(kind, &raw.data)?;

	let transaction_hash = match &raw.transaction_hash {
		Some(value) if !value.is_null() => render_text(kind, "transactionHash", value)?,
		_ => {
			return Err(DecodeError::MissingField {
				kind,
				field: "transactionHash",
			});
		}
	};

	let position = ChainPosition {
		block_number: raw.block_number,
		event_index: raw.event_index,
		transaction_hash,
	};

	Ok(LedgerEvent::from_chain(
		position,
		raw.timestamp.unwrap_or_else(Utc::now),
		payload,
	))
}

/// Decode only the argument payload of an event of the given kind.
pub fn decode_payload(kind: EventKind, data: &Value) -> Result<EventPayload, DecodeError> {
	let fields = Fields::new(kind, data)?;

	let payload = match kind {
		EventKind::OrderCreated => EventPayload::OrderCreated(OrderCreated {
			order_id: fields.u64("orderId")?,
			buyer: fields.text("buyer")?,
			seller: fields.text("seller")?,
			marketplace_id: fields.u64("marketplaceId")?,
			total_amount: fields.amount("totalAmount")?,
		}),
		EventKind::ProofSubmitted => EventPayload::ProofSubmitted(ProofSubmitted {
			order_id: fields.u64("orderId")?,
			proof_cid: fields.text("proofCid")?,
			attestor: fields.text("attestor")?,
		}),
		EventKind::DisputeOpened => EventPayload::DisputeOpened(DisputeOpened {
			dispute_id: fields.u64("disputeId")?,
			order_id: fields.u64("orderId")?,
			plaintiff: fields.text("plaintiff")?,
			defendant: fields.text("defendant")?,
		}),
		EventKind::EscrowLocked => EventPayload::EscrowLocked(fields.escrow()?),
		EventKind::EscrowReleased => EventPayload::EscrowReleased(fields.escrow()?),
		EventKind::EscrowRefunded => EventPayload::EscrowRefunded(fields.escrow()?),
		EventKind::MissionCreated => EventPayload::MissionCreated(decode_mission(&fields)?),
		EventKind::MissionCompleted => EventPayload::MissionCompleted(MissionCompleted {
			user_id: fields.text("userId")?,
			mission_id: fields.u64("missionId")?,
			current_count: fields.u32("currentCount")?,
		}),
		EventKind::RewardClaimed => EventPayload::RewardClaimed(RewardClaimed {
			user_id: fields.text("userId")?,
			mission_id: fields.u64("missionId")?,
			amount: fields.amount("amount")?,
		}),
		EventKind::CashbackGranted => EventPayload::CashbackGranted(CashbackGranted {
			user_id: fields.text("userId")?,
			order_id: fields.u64("orderId")?,
			order_amount: fields.amount("orderAmount")?,
			cashback_amount: fields.amount("cashbackAmount")?,
		}),
	};

	Ok(payload)
}

/// Decode a mission record as returned by a state query.
pub fn decode_mission_record(data: &Value) -> Result<MissionCreated, DecodeError> {
	let fields = Fields::new(EventKind::MissionCreated, data)?;
	decode_mission(&fields)
}

fn decode_mission(fields: &Fields<'_>) -> Result<MissionCreated, DecodeError> {
	Ok(MissionCreated {
		mission_id: fields.u64("missionId")?,
		title: fields.text("title")?,
		description: fields.optional_text("description")?.unwrap_or_default(),
		mission_type: fields.text("missionType")?,
		reward_amount: fields.amount("rewardAmount")?,
		required_count: fields.u32("requiredCount")?,
		active: fields.boolean("active")?,
	})
}

/// Accessor over named-or-positional event arguments.
struct Fields<'a> {
	kind: EventKind,
	data: &'a Value,
}

impl<'a> Fields<'a> {
	fn new(kind: EventKind, data: &'a Value) -> Result<Self, DecodeError> {
		match data {
			Value::Object(_) | Value::Array(_) => Ok(Self { kind, data }),
			_ => Err(DecodeError::MalformedData { kind }),
		}
	}

	fn lookup(&self, field: &'static str) -> Option<&'a Value> {
		let value = match self.data {
			Value::Object(map) => map.get(field),
			Value::Array(items) => field_order(self.kind)
				.iter()
				.position(|name| *name == field)
				.and_then(|index| items.get(index)),
			_ => None,
		};
		value.filter(|v| !v.is_null())
	}

	fn get(&self, field: &'static str) -> Result<&'a Value, DecodeError> {
		self.lookup(field).ok_or(DecodeError::MissingField {
			kind: self.kind,
			field,
		})
	}

	fn invalid(&self, field: &'static str, reason: impl Into<String>) -> DecodeError {
		DecodeError::InvalidField {
			kind: self.kind,
			field,
			reason: reason.into(),
		}
	}

	fn u64(&self, field: &'static str) -> Result<u64, DecodeError> {
		match self.get(field)? {
			Value::Number(n) => n
				.as_u64()
				.ok_or_else(|| self.invalid(field, format!("{} is not an unsigned integer", n))),
			Value::String(s) => s
				.trim()
				.parse::<u64>()
				.map_err(|e| self.invalid(field, format!("{:?}: {}", s, e))),
			other => Err(self.invalid(field, format!("expected integer, got {}", other))),
		}
	}

	fn u32(&self, field: &'static str) -> Result<u32, DecodeError> {
		let value = self.u64(field)?;
		u32::try_from(value).map_err(|_| self.invalid(field, format!("{} does not fit in u32", value)))
	}

	fn text(&self, field: &'static str) -> Result<String, DecodeError> {
		render_text(self.kind, field, self.get(field)?)
	}

	fn optional_text(&self, field: &'static str) -> Result<Option<String>, DecodeError> {
		self.lookup(field)
			.map(|value| render_text(self.kind, field, value))
			.transpose()
	}

	/// Amounts stay decimal strings; only the shape is validated.
	fn amount(&self, field: &'static str) -> Result<String, DecodeError> {
		match self.get(field)? {
			Value::String(s) if is_decimal(s) => Ok(s.clone()),
			Value::String(s) => Err(self.invalid(field, format!("{:?} is not a decimal amount", s))),
			Value::Number(n) if n.is_u64() => Ok(n.to_string()),
			Value::Number(n) => Err(self.invalid(
				field,
				format!("{} cannot be represented without precision loss", n),
			)),
			other => Err(self.invalid(field, format!("expected amount, got {}", other))),
		}
	}

	fn boolean(&self, field: &'static str) -> Result<bool, DecodeError> {
		match self.get(field)? {
			Value::Bool(b) => Ok(*b),
			Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
			Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
			Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
			Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
			other => Err(self.invalid(field, format!("expected boolean, got {}", other))),
		}
	}

	fn escrow(&self) -> Result<EscrowTransition, DecodeError> {
		Ok(EscrowTransition {
			external_order_id: self.text("externalOrderId")?,
			buyer: self.text("buyer")?,
			seller: self.text("seller")?,
			amount: self.amount("amount")?,
		})
	}
}

/// Render an identifier-like value: strings verbatim, integers in decimal,
/// byte arrays as `0x` hex.
fn render_text(kind: EventKind, field: &'static str, value: &Value) -> Result<String, DecodeError> {
	match value {
		Value::String(s) => Ok(s.clone()),
		Value::Number(n) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
		Value::Array(items) => {
			let bytes = items
				.iter()
				.map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
				.collect::<Option<Vec<u8>>>()
				.ok_or_else(|| DecodeError::InvalidField {
					kind,
					field,
					reason: "array is not a byte sequence".to_string(),
				})?;
			Ok(format!("0x{}", hex::encode(bytes)))
		}
		other => Err(DecodeError::InvalidField {
			kind,
			field,
			reason: format!("expected text, got {}", other),
		}),
	}
}

fn is_decimal(s: &str) -> bool {
	let mut parts = s.splitn(2, '.');
	let whole = parts.next().unwrap_or_default();
	let fraction = parts.next();
	!whole.is_empty()
		&& whole.bytes().all(|b| b.is_ascii_digit())
		&& fraction.is_none_or(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}
