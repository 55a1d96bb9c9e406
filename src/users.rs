//! User accounts and authentication.
//!
//! Three roles: workers (tied to a sale location), supervisors, and admins.
//! Passwords are bcrypt-hashed at rest. Worker listings follow the fixed
//! order of the printed order sheet, with unrecognized locations appended
//! alphabetically.

use bcrypt::{hash, verify, DEFAULT_COST};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::DbState;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Worker,
    Supervisor,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Worker => "worker",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Role> {
        match s {
            "worker" => Some(Role::Worker),
            "supervisor" => Some(Role::Supervisor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub location: Option<String>,
}

impl User {
    /// Display label: the location if set, else the username.
    pub fn label(&self) -> &str {
        self.location.as_deref().unwrap_or(&self.username)
    }
}

/// Display order of worker labels on the order sheet. Labels outside this
/// list sort after it, alphabetically.
const WORKER_DISPLAY_ORDER: [&str; 11] = [
    "prabhadevi 1",
    "prabhadevi 2",
    "parel",
    "saat rasta",
    "sea face",
    "worli bdd",
    "worli mix",
    "matunga",
    "mahim",
    "koliwada",
    "mix",
];

fn display_rank(label: &str) -> usize {
    let lower = label.to_lowercase();
    WORKER_DISPLAY_ORDER
        .iter()
        .position(|l| *l == lower)
        .unwrap_or(WORKER_DISPLAY_ORDER.len())
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Create a user. Username must be non-empty and unique; workers normally
/// carry a location label, other roles do not need one.
pub fn create_user(
    db: &DbState,
    username: &str,
    password: &str,
    role: Role,
    location: Option<&str>,
) -> Result<i64> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::validation("username must not be empty"));
    }
    if password.is_empty() {
        return Err(Error::validation("password must not be empty"));
    }

    let password_hash = hash(password, DEFAULT_COST)?;

    let conn = db.lock()?;
    conn.execute(
        "INSERT INTO users (username, password_hash, role, location)
         VALUES (?1, ?2, ?3, ?4)",
        params![username, password_hash, role.as_str(), location],
    )?;
    let id = conn.last_insert_rowid();
    info!("Created {} user '{}' (id {})", role.as_str(), username, id);
    Ok(id)
}

/// Verify credentials and record the login time. Returns `NotFound` for an
/// unknown username and `Validation` for a wrong password.
pub fn authenticate(db: &DbState, username: &str, password: &str) -> Result<User> {
    let conn = db.lock()?;

    let row: Option<(i64, String, String, Option<String>)> = conn
        .query_row(
            "SELECT id, password_hash, role, location FROM users WHERE username = ?1",
            params![username],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let (id, password_hash, role_str, location) =
        row.ok_or_else(|| Error::not_found("user", username))?;

    if !verify(password, &password_hash)? {
        return Err(Error::validation("invalid credentials"));
    }

    conn.execute(
        "UPDATE users SET last_login = strftime('%s','now') WHERE id = ?1",
        params![id],
    )?;

    let role = Role::from_str(&role_str)
        .ok_or_else(|| Error::validation(format!("unknown role in database: {role_str}")))?;

    info!("User '{}' authenticated ({})", username, role.as_str());

    Ok(User {
        id,
        username: username.to_string(),
        role,
        location,
    })
}

/// All worker accounts in order-sheet display order.
pub fn get_workers(db: &DbState) -> Result<Vec<User>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, username, role, location FROM users WHERE role = 'worker'",
    )?;
    let mut workers: Vec<User> = stmt
        .query_map([], |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                role: Role::Worker,
                location: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    workers.sort_by(|a, b| {
        let (ra, rb) = (display_rank(a.label()), display_rank(b.label()));
        ra.cmp(&rb)
            .then_with(|| a.label().to_lowercase().cmp(&b.label().to_lowercase()))
    });

    Ok(workers)
}

/// Fetch a single user by id.
pub fn get_user(db: &DbState, user_id: i64) -> Result<User> {
    let conn = db.lock()?;
    get_user_tx(&conn, user_id)
}

pub(crate) fn get_user_tx(conn: &rusqlite::Connection, user_id: i64) -> Result<User> {
    let row: Option<(i64, String, String, Option<String>)> = conn
        .query_row(
            "SELECT id, username, role, location FROM users WHERE id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    let (id, username, role_str, location) =
        row.ok_or_else(|| Error::not_found("user", user_id))?;
    let role = Role::from_str(&role_str)
        .ok_or_else(|| Error::validation(format!("unknown role in database: {role_str}")))?;
    Ok(User {
        id,
        username,
        role,
        location,
    })
}

/// Change a user's location label.
pub fn update_user_location(db: &DbState, user_id: i64, location: Option<&str>) -> Result<()> {
    let conn = db.lock()?;
    let changed = conn.execute(
        "UPDATE users SET location = ?1 WHERE id = ?2",
        params![location, user_id],
    )?;
    if changed == 0 {
        return Err(Error::not_found("user", user_id));
    }
    Ok(())
}

/// Delete a user. Their rate rows cascade; their submissions remain.
pub fn delete_user(db: &DbState, user_id: i64) -> Result<()> {
    let conn = db.lock()?;
    let changed = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
    if changed == 0 {
        return Err(Error::not_found("user", user_id));
    }
    info!("Deleted user {user_id}");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_create_and_authenticate() {
        let state = db::test_state();
        let id = create_user(&state, "parel_w", "secret", Role::Worker, Some("PAREL")).unwrap();

        let user = authenticate(&state, "parel_w", "secret").unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, Role::Worker);
        assert_eq!(user.location.as_deref(), Some("PAREL"));

        // last_login recorded
        let conn = state.conn.lock().unwrap();
        let last_login: Option<i64> = conn
            .query_row("SELECT last_login FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(last_login.is_some());
    }

    #[test]
    fn test_authenticate_failures() {
        let state = db::test_state();
        create_user(&state, "admin1", "pw", Role::Admin, None).unwrap();

        assert!(matches!(
            authenticate(&state, "nobody", "pw"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            authenticate(&state, "admin1", "wrong"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_create_user_validation() {
        let state = db::test_state();
        assert!(create_user(&state, "  ", "pw", Role::Worker, None).is_err());
        assert!(create_user(&state, "w", "", Role::Worker, None).is_err());

        create_user(&state, "dup", "pw", Role::Worker, None).unwrap();
        assert!(create_user(&state, "dup", "pw", Role::Worker, None).is_err());
    }

    #[test]
    fn test_workers_sort_in_sheet_order() {
        let state = db::test_state();
        create_user(&state, "w_mahim", "pw", Role::Worker, Some("MAHIM")).unwrap();
        create_user(&state, "w_pd1", "pw", Role::Worker, Some("Prabhadevi 1")).unwrap();
        create_user(&state, "w_dadar", "pw", Role::Worker, Some("Dadar")).unwrap();
        create_user(&state, "w_parel", "pw", Role::Worker, Some("PAREL")).unwrap();
        create_user(&state, "boss", "pw", Role::Admin, None).unwrap();

        let workers = get_workers(&state).unwrap();
        let labels: Vec<&str> = workers.iter().map(|w| w.label()).collect();
        assert_eq!(labels, vec!["Prabhadevi 1", "PAREL", "MAHIM", "Dadar"]);
    }

    #[test]
    fn test_label_falls_back_to_username() {
        let state = db::test_state();
        create_user(&state, "floater", "pw", Role::Worker, None).unwrap();
        let workers = get_workers(&state).unwrap();
        assert_eq!(workers[0].label(), "floater");
    }

    #[test]
    fn test_delete_user_cascades_rates() {
        let state = db::test_state();
        let id = create_user(&state, "w1", "pw", Role::Worker, Some("PAREL")).unwrap();
        {
            let conn = state.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO worker_rates (worker_id, name, retail_rate) VALUES (?1, 'BR 400', 5.0)",
                [id],
            )
            .unwrap();
        }

        delete_user(&state, id).unwrap();

        let conn = state.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM worker_rates", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_update_location_missing_user() {
        let state = db::test_state();
        assert!(matches!(
            update_user_location(&state, 99, Some("PAREL")),
            Err(Error::NotFound { .. })
        ));
    }
}
