//! SeaORM implementation of ReservationRepository

use async_trait::async_trait;
use log::debug;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set,
};

use super::db_err;
use crate::domain::reservation::{Reservation, ReservationRepository, ReservationStatus};
use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::database::entities::reservation;

pub struct SeaOrmReservationRepository {
    db: DatabaseConnection,
}

impl SeaOrmReservationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

// ── Conversion helpers ──────────────────────────────────────────

fn model_to_domain(m: reservation::Model) -> Reservation {
    Reservation {
        id: m.id,
        user_id: m.user_id,
        parking_spot_id: m.parking_spot_id,
        car_number: m.car_number,
        start_time_of_reservation: m.start_time_of_reservation,
        start_time_of_parking: m.start_time_of_parking,
        end_time_of_parking: m.end_time_of_parking,
        duration: m.duration_secs.map(chrono::Duration::seconds),
        is_gate_opened: m.is_gate_opened,
        status: ReservationStatus::from_str(&m.status),
    }
}

fn domain_to_active(r: Reservation) -> reservation::ActiveModel {
    reservation::ActiveModel {
        id: Set(r.id),
        user_id: Set(r.user_id),
        parking_spot_id: Set(r.parking_spot_id),
        car_number: Set(r.car_number),
        start_time_of_reservation: Set(r.start_time_of_reservation),
        start_time_of_parking: Set(r.start_time_of_parking),
        end_time_of_parking: Set(r.end_time_of_parking),
        duration_secs: Set(r.duration.map(|d| d.num_seconds())),
        is_gate_opened: Set(r.is_gate_opened),
        status: Set(r.status.as_str().to_string()),
    }
}

fn changed_concurrently(id: i32) -> DomainError {
    DomainError::Conflict(format!("Reservation {} changed during update", id))
}

fn not_found(id: i32) -> DomainError {
    DomainError::NotFound {
        entity: "Reservation",
        field: "id",
        value: id.to_string(),
    }
}

// ── ReservationRepository impl ──────────────────────────────────

#[async_trait]
impl ReservationRepository for SeaOrmReservationRepository {
    async fn save(&self, r: Reservation) -> DomainResult<()> {
        debug!("Saving reservation: {}", r.id);
        domain_to_active(r).insert(&self.db).await.map_err(db_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Reservation>> {
        let model = reservation::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?;
        Ok(model.map(model_to_domain))
    }

    async fn update(&self, r: Reservation) -> DomainResult<()> {
        debug!("Updating reservation: {}", r.id);

        let existing = reservation::Entity::find_by_id(r.id)
            .one(&self.db)
            .await
            .map_err(db_err)?;

        let Some(existing) = existing else {
            return Err(not_found(r.id));
        };
        ReservationStatus::from_str(&existing.status).check_update(r.id, r.status)?;

        let id = r.id;
        let mut active = domain_to_active(r);
        active.id = NotSet;
        // Only mark_gate_opened writes the flag
        active.is_gate_opened = NotSet;

        // Guarded on the status we checked against
        let result = reservation::Entity::update_many()
            .set(active)
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::Status.eq(existing.status.as_str()))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        if result.rows_affected == 0 {
            return Err(changed_concurrently(id));
        }
        Ok(())
    }

    async fn find_eligible_for_gate(&self, user_id: &str) -> DomainResult<Option<Reservation>> {
        let model = reservation::Entity::find()
            .filter(reservation::Column::UserId.eq(user_id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Pending.as_str()))
            .filter(reservation::Column::IsGateOpened.eq(false))
            .order_by_desc(reservation::Column::Id)
            .one(&self.db)
            .await
            .map_err(db_err)?;
        Ok(model.map(model_to_domain))
    }

    async fn mark_gate_opened(&self, id: i32) -> DomainResult<bool> {
        let result = reservation::Entity::update_many()
            .col_expr(reservation::Column::IsGateOpened, Expr::value(true))
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Pending.as_str()))
            .filter(reservation::Column::IsGateOpened.eq(false))
            .exec(&self.db)
            .await
            .map_err(db_err)?;

        debug!("mark_gate_opened({}): {} row(s)", id, result.rows_affected);
        Ok(result.rows_affected == 1)
    }

    async fn find_for_user(&self, user_id: &str) -> DomainResult<Vec<Reservation>> {
        let models = reservation::Entity::find()
            .filter(reservation::Column::UserId.eq(user_id))
            .order_by_desc(reservation::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        Ok(models.into_iter().map(model_to_domain).collect())
    }

    async fn cancel(&self, id: i32) -> DomainResult<()> {
        let existing = reservation::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?;

        let Some(existing) = existing else {
            return Err(not_found(id));
        };

        let mut r = model_to_domain(existing.clone());
        r.cancel()?;

        let result = reservation::Entity::update_many()
            .col_expr(reservation::Column::Status, Expr::value(r.status.as_str()))
            .filter(reservation::Column::Id.eq(id))
            .filter(reservation::Column::Status.eq(existing.status.as_str()))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        if result.rows_affected == 0 {
            return Err(changed_concurrently(id));
        }
        Ok(())
    }

    async fn next_id(&self) -> DomainResult<i32> {
        let last = reservation::Entity::find()
            .order_by_desc(reservation::Column::Id)
            .one(&self.db)
            .await
            .map_err(db_err)?;
        Ok(last.map(|m| m.id + 1).unwrap_or(1))
    }
}
