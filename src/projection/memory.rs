use super::models::*;
use super::store::{ProjectionStore, StoreError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every projection table, in a form that can be snapshotted to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionTables {
    pub chain_orders: BTreeMap<u64, ChainOrder>,
    pub delivery_proofs: Vec<DeliveryProof>,
    pub disputes: BTreeMap<u64, Dispute>,
    pub commerce_orders: Vec<CommerceOrder>,
    pub escrow_logs: Vec<EscrowLog>,
    pub missions: BTreeMap<u64, Mission>,
    pub mission_progress: Vec<UserMissionProgress>,
    pub cashback_grants: Vec<CashbackGrant>,
}

impl ProjectionTables {
    pub fn counts(&self) -> TableCounts {
        TableCounts {
            chain_orders: self.chain_orders.len(),
            delivery_proofs: self.delivery_proofs.len(),
            disputes: self.disputes.len(),
            commerce_orders: self.commerce_orders.len(),
            escrow_logs: self.escrow_logs.len(),
            missions: self.missions.len(),
            mission_progress: self.mission_progress.len(),
            cashback_grants: self.cashback_grants.len(),
        }
    }

    fn next_id<T>(rows: &[T], id: impl Fn(&T) -> u64) -> u64 {
        rows.iter().map(id).max().unwrap_or(0) + 1
    }
}

/// Row count per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub chain_orders: usize,
    pub delivery_proofs: usize,
    pub disputes: usize,
    pub commerce_orders: usize,
    pub escrow_logs: usize,
    pub missions: usize,
    pub mission_progress: usize,
    pub cashback_grants: usize,
}

impl TableCounts {
    pub fn total(&self) -> usize {
        self.chain_orders
            + self.delivery_proofs
            + self.disputes
            + self.commerce_orders
            + self.escrow_logs
            + self.missions
            + self.mission_progress
            + self.cashback_grants
    }
}

/// In-process [`ProjectionStore`] backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryProjectionStore {
    tables: RwLock<ProjectionTables>,
}

impl MemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: ProjectionTables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Copy of every table.
    pub fn export(&self) -> ProjectionTables {
        self.tables.read().clone()
    }

    /// Replace every table with `tables`.
    pub fn import(&self, tables: ProjectionTables) {
        *self.tables.write() = tables;
    }

    pub fn counts(&self) -> TableCounts {
        self.tables.read().counts()
    }

    /// Register a checkout-owned order so escrow events can correlate to it.
    pub fn insert_commerce_order(
        &self,
        external_order_id: impl Into<String>,
    ) -> Result<CommerceOrder, StoreError> {
        let external_order_id = external_order_id.into();
        let mut tables = self.tables.write();
        if tables
            .commerce_orders
            .iter()
            .any(|order| order.external_order_id == external_order_id)
        {
            return Err(StoreError::UniqueViolation {
                entity: "commerce_order",
                key: external_order_id,
            });
        }

        let order = CommerceOrder {
            id: ProjectionTables::next_id(&tables.commerce_orders, |o| o.id),
            external_order_id,
            escrow_status: None,
            escrow_updated_at: None,
        };
        tables.commerce_orders.push(order.clone());
        Ok(order)
    }

    pub fn chain_orders(&self) -> Vec<ChainOrder> {
        self.tables.read().chain_orders.values().cloned().collect()
    }

    pub fn delivery_proofs(&self) -> Vec<DeliveryProof> {
        self.tables.read().delivery_proofs.clone()
    }

    pub fn disputes(&self) -> Vec<Dispute> {
        self.tables.read().disputes.values().cloned().collect()
    }

    pub fn missions(&self) -> Vec<Mission> {
        self.tables.read().missions.values().cloned().collect()
    }

    pub fn all_escrow_logs(&self) -> Vec<EscrowLog> {
        self.tables.read().escrow_logs.clone()
    }

    pub fn all_cashback_grants(&self) -> Vec<CashbackGrant> {
        self.tables.read().cashback_grants.clone()
    }
}

#[async_trait::async_trait]
impl ProjectionStore for MemoryProjectionStore {
    async fn find_chain_order(&self, order_id: u64) -> Result<Option<ChainOrder>, StoreError> {
        Ok(self.tables.read().chain_orders.get(&order_id).cloned())
    }

    async fn insert_chain_order(&self, order: ChainOrder) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.chain_orders.contains_key(&order.order_id) {
            return Err(StoreError::UniqueViolation {
                entity: "chain_order",
                key: order.order_id.to_string(),
            });
        }
        tables.chain_orders.insert(order.order_id, order);
        Ok(())
    }

    async fn update_chain_order_status(
        &self,
        order_id: u64,
        status: ChainOrderStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let order = tables
            .chain_orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::MissingRow {
                entity: "chain_order",
                key: order_id.to_string(),
            })?;
        order.status = status;
        Ok(())
    }

    async fn find_delivery_proof(
        &self,
        order_id: u64,
        proof_cid: &str,
    ) -> Result<Option<DeliveryProof>, StoreError> {
        Ok(self
            .tables
            .read()
            .delivery_proofs
            .iter()
            .find(|proof| proof.order_id == order_id && proof.proof_cid == proof_cid)
            .cloned())
    }

    async fn insert_delivery_proof(&self, proof: DeliveryProof) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables
            .delivery_proofs
            .iter()
            .any(|p| p.order_id == proof.order_id && p.proof_cid == proof.proof_cid)
        {
            return Err(StoreError::UniqueViolation {
                entity: "delivery_proof",
                key: format!("{}/{}", proof.order_id, proof.proof_cid),
            });
        }
        tables.delivery_proofs.push(proof);
        Ok(())
    }

    async fn find_dispute(&self, dispute_id: u64) -> Result<Option<Dispute>, StoreError> {
        Ok(self.tables.read().disputes.get(&dispute_id).cloned())
    }

    async fn insert_dispute(&self, dispute: Dispute) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.disputes.contains_key(&dispute.dispute_id) {
            return Err(StoreError::UniqueViolation {
                entity: "dispute",
                key: dispute.dispute_id.to_string(),
            });
        }
        tables.disputes.insert(dispute.dispute_id, dispute);
        Ok(())
    }

    async fn find_commerce_order(
        &self,
        external_order_id: &str,
    ) -> Result<Option<CommerceOrder>, StoreError> {
        Ok(self
            .tables
            .read()
            .commerce_orders
            .iter()
            .find(|order| order.external_order_id == external_order_id)
            .cloned())
    }

    async fn apply_escrow_transition(&self, log: NewEscrowLog) -> Result<EscrowLog, StoreError> {
        let mut tables = self.tables.write();
        let id = ProjectionTables::next_id(&tables.escrow_logs, |l| l.id);
        let order = tables
            .commerce_orders
            .iter_mut()
            .find(|order| order.id == log.commerce_order_id)
            .ok_or_else(|| StoreError::MissingRow {
                entity: "commerce_order",
                key: log.commerce_order_id.to_string(),
            })?;
        order.escrow_status = Some(log.kind.resulting_status());
        order.escrow_updated_at = Some(log.payload.timestamp);

        let row = EscrowLog {
            id,
            commerce_order_id: log.commerce_order_id,
            kind: log.kind,
            payload: log.payload,
        };
        tables.escrow_logs.push(row.clone());
        Ok(row)
    }

    async fn escrow_logs(&self, commerce_order_id: u64) -> Result<Vec<EscrowLog>, StoreError> {
        Ok(self
            .tables
            .read()
            .escrow_logs
            .iter()
            .filter(|log| log.commerce_order_id == commerce_order_id)
            .cloned()
            .collect())
    }

    async fn find_mission(&self, mission_id: u64) -> Result<Option<Mission>, StoreError> {
        Ok(self.tables.read().missions.get(&mission_id).cloned())
    }

    async fn insert_mission(&self, mission: Mission) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.missions.contains_key(&mission.mission_id) {
            return Err(StoreError::UniqueViolation {
                entity: "mission",
                key: mission.mission_id.to_string(),
            });
        }
        tables.missions.insert(mission.mission_id, mission);
        Ok(())
    }

    async fn find_mission_progress(
        &self,
        user_id: &str,
        mission_id: u64,
    ) -> Result<Option<UserMissionProgress>, StoreError> {
        Ok(self
            .tables
            .read()
            .mission_progress
            .iter()
            .find(|row| row.user_id == user_id && row.mission_id == mission_id)
            .cloned())
    }

    async fn upsert_mission_progress(&self, progress: UserMissionProgress) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables
            .mission_progress
            .iter_mut()
            .find(|row| row.user_id == progress.user_id && row.mission_id == progress.mission_id)
        {
            Some(row) => *row = progress,
            None => tables.mission_progress.push(progress),
        }
        Ok(())
    }

    async fn insert_cashback_grant(
        &self,
        grant: NewCashbackGrant,
    ) -> Result<CashbackGrant, StoreError> {
        let mut tables = self.tables.write();
        let row = CashbackGrant {
            id: ProjectionTables::next_id(&tables.cashback_grants, |g| g.id),
            user_id: grant.user_id,
            order_id: grant.order_id,
            order_amount: grant.order_amount,
            cashback_amount: grant.cashback_amount,
            transaction_hash: grant.transaction_hash,
            block_number: grant.block_number,
            event_index: grant.event_index,
            granted_at: grant.granted_at,
        };
        tables.cashback_grants.push(row.clone());
        Ok(row)
    }

    async fn find_cashback_grant(
        &self,
        user_id: &str,
        transaction_hash: &str,
        event_index: u32,
    ) -> Result<Option<CashbackGrant>, StoreError> {
        Ok(self
            .tables
            .read()
            .cashback_grants
            .iter()
            .find(|grant| {
                grant.user_id == user_id
                    && grant.transaction_hash == transaction_hash
                    && grant.event_index == event_index
            })
            .cloned())
    }

    async fn cashback_grants(&self, user_id: &str) -> Result<Vec<CashbackGrant>, StoreError> {
        Ok(self
            .tables
            .read()
            .cashback_grants
            .iter()
            .filter(|grant| grant.user_id == user_id)
            .cloned()
            .collect())
    }
}
