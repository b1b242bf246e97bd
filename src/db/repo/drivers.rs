//! Driver operations for the repository.

use crate::domain::{BoundingBox, Driver, DriverId, DriverStatus, GeoPoint, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{
    opt_time, parse_driver_status, parse_vehicle_type, placeholders, point_from_columns,
    Repository,
};

const DRIVER_COLUMNS: &str = r#"
    id, name, phone, license_plate, vehicle_type, lat, lng,
    last_location_update_ms, status, created_at_ms, updated_at_ms
"#;

fn driver_from_row(row: &SqliteRow) -> Result<Driver, sqlx::Error> {
    Ok(Driver {
        id: DriverId::new(row.get::<String, _>("id")),
        name: row.get::<String, _>("name"),
        phone: row.get::<Option<String>, _>("phone"),
        license_plate: row.get::<Option<String>, _>("license_plate"),
        vehicle_type: parse_vehicle_type(&row.get::<String, _>("vehicle_type"))?,
        current_location: point_from_columns(
            row.get::<Option<f64>, _>("lat"),
            row.get::<Option<f64>, _>("lng"),
        )?,
        last_location_update: opt_time(row.get::<Option<i64>, _>("last_location_update_ms")),
        status: parse_driver_status(&row.get::<String, _>("status"))?,
        created_at: TimeMs::new(row.get::<i64, _>("created_at_ms")),
        updated_at: TimeMs::new(row.get::<i64, _>("updated_at_ms")),
    })
}

impl Repository {
    /// Register a driver. Returns `false` if the id is already taken.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_driver(&self, driver: &Driver) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO drivers (
                id, name, phone, license_plate, vehicle_type, lat, lng,
                last_location_update_ms, status, created_at_ms, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(driver.id.as_str())
        .bind(driver.name.as_str())
        .bind(driver.phone.as_deref())
        .bind(driver.license_plate.as_deref())
        .bind(driver.vehicle_type.as_str())
        .bind(driver.current_location.map(|p| p.lat))
        .bind(driver.current_location.map(|p| p.lng))
        .bind(driver.last_location_update.map(|t| t.as_ms()))
        .bind(driver.status.as_str())
        .bind(driver.created_at.as_ms())
        .bind(driver.updated_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch a driver by id.
    ///
    /// # Errors
    /// Returns an error if the query fails or the stored row is malformed.
    pub async fn get_driver(&self, driver_id: &DriverId) -> Result<Option<Driver>, sqlx::Error> {
        let sql = format!("SELECT {} FROM drivers WHERE id = ?", DRIVER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(driver_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(driver_from_row).transpose()
    }

    /// Record a location ping. Status is left untouched.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update_driver_location(
        &self,
        driver_id: &DriverId,
        location: GeoPoint,
        at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE drivers
            SET lat = ?, lng = ?, last_location_update_ms = ?, updated_at_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(location.lat)
        .bind(location.lng)
        .bind(at.as_ms())
        .bind(at.as_ms())
        .bind(driver_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Write `driver.status` only if the stored status is one of `expected`.
    ///
    /// Returns `false` when the driver moved to another status in the meantime.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update_driver_status_if(
        &self,
        driver: &Driver,
        expected: &[DriverStatus],
    ) -> Result<bool, sqlx::Error> {
        if expected.is_empty() {
            return Ok(false);
        }

        let sql = format!(
            r#"
            UPDATE drivers SET status = ?, updated_at_ms = ?
            WHERE id = ? AND status IN ({})
            "#,
            placeholders(expected.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(driver.status.as_str())
            .bind(driver.updated_at.as_ms())
            .bind(driver.id.as_str());
        for status in expected {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// `AVAILABLE` drivers inside `area` whose last ping is at or after `since`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_available_drivers_in_area(
        &self,
        area: &BoundingBox,
        since: TimeMs,
        limit: i64,
    ) -> Result<Vec<Driver>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM drivers
            WHERE status = ?
              AND lat BETWEEN ? AND ?
              AND lng BETWEEN ? AND ?
              AND last_location_update_ms >= ?
            ORDER BY last_location_update_ms DESC, id
            LIMIT ?
            "#,
            DRIVER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(DriverStatus::Available.as_str())
            .bind(area.min_lat)
            .bind(area.max_lat)
            .bind(area.min_lng)
            .bind(area.max_lng)
            .bind(since.as_ms())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(driver_from_row).collect()
    }

    /// Non-offline drivers whose last ping is older than `cutoff`.
    ///
    /// Drivers that never reported a location are not considered stale.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_stale_drivers(&self, cutoff: TimeMs) -> Result<Vec<Driver>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM drivers
            WHERE status <> ? AND last_location_update_ms < ?
            ORDER BY last_location_update_ms ASC, id
            "#,
            DRIVER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(DriverStatus::Offline.as_str())
            .bind(cutoff.as_ms())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(driver_from_row).collect()
    }

    /// Offline `driver` only if it is still in `expected` and has not pinged
    /// since `cutoff`. A ping landing after the stale listing wins.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_offline_if_stale(
        &self,
        driver: &Driver,
        expected: DriverStatus,
        cutoff: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE drivers SET status = ?, updated_at_ms = ?
            WHERE id = ? AND status = ? AND last_location_update_ms < ?
            "#,
        )
        .bind(DriverStatus::Offline.as_str())
        .bind(driver.updated_at.as_ms())
        .bind(driver.id.as_str())
        .bind(expected.as_str())
        .bind(cutoff.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of drivers currently in `status`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    #[cfg(test)]
    pub async fn count_drivers_by_status(&self, status: DriverStatus) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM drivers WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}
