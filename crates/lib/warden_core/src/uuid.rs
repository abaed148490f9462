// Helper for generating UUIDv7 (timestamp-sortable UUIDs)
//
// Sessions, devices and audit log rows are generated app-side as UUIDv7 so
// that listing them by id matches creation order. Users, roles and
// permissions use PG's gen_random_uuid() (v4).

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
