//! SeaORM implementation of ParkingSpotRepository

use async_trait::async_trait;
use log::debug;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};

use super::db_err;
use crate::domain::parking_spot::{ParkingSpot, ParkingSpotRepository};
use crate::domain::DomainResult;
use crate::infrastructure::database::entities::parking_spot;

pub struct SeaOrmParkingSpotRepository {
    db: DatabaseConnection,
}

impl SeaOrmParkingSpotRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn model_to_domain(m: parking_spot::Model) -> ParkingSpot {
    ParkingSpot {
        id: m.id,
        name: m.name,
        gate_device_id: m.gate_device_id,
    }
}

#[async_trait]
impl ParkingSpotRepository for SeaOrmParkingSpotRepository {
    async fn save(&self, spot: ParkingSpot) -> DomainResult<()> {
        debug!("Saving parking spot: {}", spot.id);

        let model = parking_spot::ActiveModel {
            id: Set(spot.id),
            name: Set(spot.name),
            gate_device_id: Set(spot.gate_device_id),
        };
        model.insert(&self.db).await.map_err(db_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: i32) -> DomainResult<Option<ParkingSpot>> {
        let model = parking_spot::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?;
        Ok(model.map(model_to_domain))
    }

    async fn find_all(&self) -> DomainResult<Vec<ParkingSpot>> {
        let models = parking_spot::Entity::find()
            .order_by_asc(parking_spot::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        Ok(models.into_iter().map(model_to_domain).collect())
    }
}
