//! In-memory storage implementation
//!
//! Same contract as the SeaORM repositories, including the conditional
//! `mark_gate_opened`: the check and the flip happen under the entry's
//! shard lock, so concurrent callers cannot both succeed.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::{
    DomainError, DomainResult, ParkingSpot, ParkingSpotRepository, RepositoryProvider,
    Reservation, ReservationRepository,
};

/// In-memory storage for development and testing
#[derive(Default)]
pub struct InMemoryRepositoryProvider {
    reservations: InMemoryReservations,
    parking_spots: InMemoryParkingSpots,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RepositoryProvider for InMemoryRepositoryProvider {
    fn reservations(&self) -> &dyn ReservationRepository {
        &self.reservations
    }

    fn parking_spots(&self) -> &dyn ParkingSpotRepository {
        &self.parking_spots
    }
}

fn not_found(entity: &'static str, id: i32) -> DomainError {
    DomainError::NotFound {
        entity,
        field: "id",
        value: id.to_string(),
    }
}

#[derive(Default)]
struct InMemoryReservations {
    rows: DashMap<i32, Reservation>,
}

#[async_trait]
impl ReservationRepository for InMemoryReservations {
    async fn save(&self, reservation: Reservation) -> DomainResult<()> {
        match self.rows.entry(reservation.id) {
            Entry::Occupied(_) => Err(DomainError::Conflict(format!(
                "Reservation {}",
                reservation.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(reservation);
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Reservation>> {
        Ok(self.rows.get(&id).map(|r| r.clone()))
    }

    async fn update(&self, reservation: Reservation) -> DomainResult<()> {
        let Some(mut row) = self.rows.get_mut(&reservation.id) else {
            return Err(not_found("Reservation", reservation.id));
        };
        row.status.check_update(reservation.id, reservation.status)?;
        let is_gate_opened = row.is_gate_opened;
        *row = Reservation {
            is_gate_opened,
            ..reservation
        };
        Ok(())
    }

    async fn find_eligible_for_gate(&self, user_id: &str) -> DomainResult<Option<Reservation>> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.user_id == user_id && r.is_eligible_for_gate())
            .max_by_key(|r| r.id)
            .map(|r| r.clone()))
    }

    async fn mark_gate_opened(&self, id: i32) -> DomainResult<bool> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        Ok(row.mark_gate_opened().is_ok())
    }

    async fn find_for_user(&self, user_id: &str) -> DomainResult<Vec<Reservation>> {
        let mut found: Vec<Reservation> = self
            .rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        found.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(found)
    }

    async fn cancel(&self, id: i32) -> DomainResult<()> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Err(not_found("Reservation", id));
        };
        row.cancel()
    }

    async fn next_id(&self) -> DomainResult<i32> {
        Ok(self.rows.iter().map(|r| r.id).max().unwrap_or(0) + 1)
    }
}

#[derive(Default)]
struct InMemoryParkingSpots {
    rows: DashMap<i32, ParkingSpot>,
}

#[async_trait]
impl ParkingSpotRepository for InMemoryParkingSpots {
    async fn save(&self, spot: ParkingSpot) -> DomainResult<()> {
        match self.rows.entry(spot.id) {
            Entry::Occupied(_) => Err(DomainError::Conflict(format!("ParkingSpot {}", spot.id))),
            Entry::Vacant(slot) => {
                slot.insert(spot);
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, id: i32) -> DomainResult<Option<ParkingSpot>> {
        Ok(self.rows.get(&id).map(|s| s.clone()))
    }

    async fn find_all(&self) -> DomainResult<Vec<ParkingSpot>> {
        let mut spots: Vec<ParkingSpot> = self.rows.iter().map(|s| s.clone()).collect();
        spots.sort_by_key(|s| s.id);
        Ok(spots)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::ReservationStatus;

    async fn seeded() -> InMemoryRepositoryProvider {
        let repos = InMemoryRepositoryProvider::new();
        repos
            .reservations()
            .save(Reservation::new(1, "user-1", 10, "ABC-123"))
            .await
            .unwrap();
        repos
    }

    #[tokio::test]
    async fn duplicate_save_conflicts() {
        let repos = seeded().await;
        let err = repos
            .reservations()
            .save(Reservation::new(1, "user-2", 11, "XYZ"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(repos.reservations().next_id().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn conditional_update_flips_once() {
        let repos = seeded().await;
        assert!(repos.reservations().mark_gate_opened(1).await.unwrap());
        assert!(!repos.reservations().mark_gate_opened(1).await.unwrap());
        assert!(!repos.reservations().mark_gate_opened(7).await.unwrap());
        assert!(repos
            .reservations()
            .find_eligible_for_gate("user-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn concurrent_updates_flip_at_most_once() {
        let repos = Arc::new(seeded().await);
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let repos = repos.clone();
                tokio::spawn(async move { repos.reservations().mark_gate_opened(1).await.unwrap() })
            })
            .collect();

        let mut flipped = 0;
        for task in tasks {
            if task.await.unwrap() {
                flipped += 1;
            }
        }
        assert_eq!(flipped, 1);
    }

    #[tokio::test]
    async fn canceled_reservation_is_not_eligible() {
        let repos = seeded().await;
        repos.reservations().cancel(1).await.unwrap();

        let r = repos.reservations().find_by_id(1).await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Canceled);
        assert!(!repos.reservations().mark_gate_opened(1).await.unwrap());
        assert!(repos.reservations().cancel(1).await.is_err());
    }

    #[tokio::test]
    async fn stale_update_keeps_flag() {
        let repos = seeded().await;
        let stale = repos.reservations().find_by_id(1).await.unwrap().unwrap();
        repos.reservations().mark_gate_opened(1).await.unwrap();
        repos.reservations().update(stale).await.unwrap();
        assert!(repos
            .reservations()
            .find_by_id(1)
            .await
            .unwrap()
            .unwrap()
            .is_gate_opened);
    }

    #[tokio::test]
    async fn stale_update_cannot_reopen_canceled_reservation() {
        let repos = seeded().await;
        let stale = repos.reservations().find_by_id(1).await.unwrap().unwrap();
        repos.reservations().cancel(1).await.unwrap();

        let err = repos.reservations().update(stale).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        let r = repos.reservations().find_by_id(1).await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Canceled);
        assert!(repos
            .reservations()
            .find_eligible_for_gate("user-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_moves_status_forward() {
        let repos = seeded().await;
        let mut r = repos.reservations().find_by_id(1).await.unwrap().unwrap();
        r.car_number = "XYZ-999".into();
        repos.reservations().update(r.clone()).await.unwrap();

        r.activate(chrono::Utc::now()).unwrap();
        repos.reservations().update(r).await.unwrap();

        let stored = repos.reservations().find_by_id(1).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Active);
        assert_eq!(stored.car_number, "XYZ-999");
    }

    #[tokio::test]
    async fn spots_listed_in_id_order() {
        let repos = InMemoryRepositoryProvider::new();
        repos
            .parking_spots()
            .save(ParkingSpot::new(2, "B", None))
            .await
            .unwrap();
        repos
            .parking_spots()
            .save(ParkingSpot::new(1, "A", Some("esp-1".into())))
            .await
            .unwrap();

        let ids: Vec<i32> = repos
            .parking_spots()
            .find_all()
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
