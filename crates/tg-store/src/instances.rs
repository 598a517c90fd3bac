// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenant and backend-instance registry.
//!
//! Resolution answers "which instance should this invocation use": an
//! explicit id must exist, belong to the tenant, and be active; an omitted
//! id resolves to the tenant's single active instance and fails when the
//! choice would be ambiguous. Logs only ever carry instance ids.

use crate::store::{Store, StoreError, fmt_ts, parse_ts, parse_uuid};
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, named_params};
use tg_core::{AuthMaterial, BackendInstance, BackendKind, GatewayError, GatewayResult, Tenant};
use uuid::Uuid;

/// Parameters for registering a backend instance.
pub struct NewInstance {
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Backend kind.
    pub kind: BackendKind,
    /// Base URL of the backend API.
    pub base_url: String,
    /// Credential material; sealed before it touches disk.
    pub auth: AuthMaterial,
    /// Whether the instance starts active.
    pub active: bool,
    /// Rate-limit ceiling per window.
    pub rate_limit_per_window: u32,
}

fn instance_from_row(row: &Row<'_>) -> Result<BackendInstance, rusqlite::Error> {
    let id: String = row.get("id")?;
    let tenant_id: String = row.get("tenant_id")?;
    let kind: String = row.get("kind")?;
    let auth_kind: String = row.get("auth_kind")?;
    let last_synced_at: Option<String> = row.get("last_synced_at")?;
    let created_at: String = row.get("created_at")?;

    let convert = |e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(e.to_string())),
        )
    };

    Ok(BackendInstance {
        id: parse_uuid(&id).map_err(convert)?,
        tenant_id: parse_uuid(&tenant_id).map_err(convert)?,
        kind: BackendKind::parse(&kind).ok_or_else(|| {
            convert(StoreError::Corrupt(format!("unknown backend kind {kind:?}")))
        })?,
        base_url: row.get("base_url")?,
        auth_kind: tg_core::AuthKind::parse(&auth_kind).ok_or_else(|| {
            convert(StoreError::Corrupt(format!("unknown auth kind {auth_kind:?}")))
        })?,
        active: row.get::<_, i64>("active")? != 0,
        last_synced_at: last_synced_at
            .map(|raw| parse_ts(&raw))
            .transpose()
            .map_err(convert)?,
        rate_limit_per_window: row.get::<_, i64>("rate_limit_per_window")? as u32,
        created_at: parse_ts(&created_at).map_err(convert)?,
    })
}

impl Store {
    // ── Tenants ─────────────────────────────────────────────────────

    /// Create a tenant. Administrative operation only.
    ///
    /// # Errors
    ///
    /// Any SQLite failure.
    pub fn create_tenant(&self, name: &str) -> Result<Tenant, StoreError> {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let conn = self.lock();
        conn.execute(
            "INSERT INTO tenants (id, name, created_at) VALUES (:id, :name, :created_at)",
            named_params! {
                ":id": tenant.id.to_string(),
                ":name": tenant.name,
                ":created_at": fmt_ts(tenant.created_at),
            },
        )?;
        Ok(tenant)
    }

    /// Look up a tenant by id.
    ///
    /// # Errors
    ///
    /// Any SQLite failure.
    pub fn tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, name, created_at FROM tenants WHERE id = :id",
                named_params! { ":id": id.to_string() },
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(id, name, created_at)| {
            Ok(Tenant {
                id: parse_uuid(&id)?,
                name,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    // ── Instances ───────────────────────────────────────────────────

    /// Register a backend instance, sealing its credentials at rest.
    ///
    /// # Errors
    ///
    /// Any SQLite, serialization, or cipher failure.
    pub fn create_instance(&self, new: NewInstance) -> Result<BackendInstance, StoreError> {
        let plaintext = serde_json::to_vec(&new.auth)?;
        let blob = self.cipher.seal(&plaintext).map_err(StoreError::Cipher)?;

        let instance = BackendInstance {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            kind: new.kind,
            base_url: new.base_url,
            auth_kind: new.auth.kind(),
            active: new.active,
            last_synced_at: None,
            rate_limit_per_window: new.rate_limit_per_window,
            created_at: Utc::now(),
        };

        let conn = self.lock();
        conn.execute(
            "INSERT INTO backend_instances
                 (id, tenant_id, kind, base_url, auth_kind, credential_blob,
                  active, rate_limit_per_window, created_at)
             VALUES
                 (:id, :tenant_id, :kind, :base_url, :auth_kind, :blob,
                  :active, :rate_limit, :created_at)",
            named_params! {
                ":id": instance.id.to_string(),
                ":tenant_id": instance.tenant_id.to_string(),
                ":kind": instance.kind.as_str(),
                ":base_url": instance.base_url,
                ":auth_kind": instance.auth_kind.as_str(),
                ":blob": blob,
                ":active": i64::from(instance.active),
                ":rate_limit": i64::from(instance.rate_limit_per_window),
                ":created_at": fmt_ts(instance.created_at),
            },
        )?;
        tracing::info!(instance_id = %instance.id, kind = %instance.kind, "instance registered");
        Ok(instance)
    }

    /// Resolve the instance an invocation should use.
    ///
    /// # Errors
    ///
    /// `not_found` when the id is unknown, inactive, or the tenant has no
    /// active instance; `validation_error` when the id was omitted and
    /// more than one active instance exists.
    pub fn resolve_instance(
        &self,
        tenant_id: Uuid,
        instance_id: Option<Uuid>,
    ) -> GatewayResult<BackendInstance> {
        if let Some(id) = instance_id {
            let conn = self.lock();
            let found = conn
                .query_row(
                    "SELECT * FROM backend_instances
                     WHERE tenant_id = :tenant_id AND id = :id AND active = 1",
                    named_params! {
                        ":tenant_id": tenant_id.to_string(),
                        ":id": id.to_string(),
                    },
                    instance_from_row,
                )
                .optional()
                .map_err(StoreError::from)?;
            return found.ok_or_else(|| {
                GatewayError::not_found("backend instance not found")
                    .with_details(serde_json::json!({ "instance_id": id.to_string() }))
            });
        }

        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM backend_instances
                 WHERE tenant_id = :tenant_id AND active = 1
                 ORDER BY created_at",
            )
            .map_err(StoreError::from)?;
        let instances: Vec<BackendInstance> = stmt
            .query_map(
                named_params! { ":tenant_id": tenant_id.to_string() },
                instance_from_row,
            )
            .map_err(StoreError::from)?
            .collect::<Result<_, _>>()
            .map_err(StoreError::from)?;

        match instances.len() {
            0 => Err(GatewayError::not_found("backend instance not found")
                .with_details(serde_json::json!({ "instance_id": null }))),
            1 => Ok(instances.into_iter().next().expect("len checked")),
            _ => {
                let ids: Vec<String> = instances.iter().map(|i| i.id.to_string()).collect();
                Err(GatewayError::validation(
                    "tenant has multiple active instances; pass instance_id",
                )
                .with_details(serde_json::json!({ "instance_ids": ids })))
            }
        }
    }

    /// Open the sealed credential blob for `instance`.
    ///
    /// The returned material flows only into the adapter's header builder.
    ///
    /// # Errors
    ///
    /// `not_found` when the row vanished; internal on cipher failures.
    pub fn credentials(&self, instance: &BackendInstance) -> GatewayResult<AuthMaterial> {
        let conn = self.lock();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT credential_blob FROM backend_instances
                 WHERE tenant_id = :tenant_id AND id = :id",
                named_params! {
                    ":tenant_id": instance.tenant_id.to_string(),
                    ":id": instance.id.to_string(),
                },
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        let blob = blob.ok_or_else(|| GatewayError::not_found("backend instance not found"))?;
        let plaintext = self
            .cipher
            .open(&blob)
            .map_err(StoreError::Cipher)
            .map_err(tg_core::GatewayError::from)?;
        let material = serde_json::from_slice(&plaintext).map_err(StoreError::from)?;
        Ok(material)
    }

    /// Flip the active flag of an instance.
    ///
    /// # Errors
    ///
    /// Any SQLite failure.
    pub fn set_instance_active(
        &self,
        tenant_id: Uuid,
        instance_id: Uuid,
        active: bool,
    ) -> Result<bool, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE backend_instances SET active = :active
             WHERE tenant_id = :tenant_id AND id = :id",
            named_params! {
                ":active": i64::from(active),
                ":tenant_id": tenant_id.to_string(),
                ":id": instance_id.to_string(),
            },
        )?;
        Ok(changed > 0)
    }

    /// Record a successful warehouse sync for an instance.
    ///
    /// # Errors
    ///
    /// Any SQLite failure.
    pub fn touch_last_synced(
        &self,
        tenant_id: Uuid,
        instance_id: Uuid,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE backend_instances SET last_synced_at = :now
             WHERE tenant_id = :tenant_id AND id = :id",
            named_params! {
                ":now": fmt_ts(Utc::now()),
                ":tenant_id": tenant_id.to_string(),
                ":id": instance_id.to_string(),
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::ErrorKind;

    fn sample_instance(tenant: Uuid) -> NewInstance {
        NewInstance {
            tenant_id: tenant,
            kind: BackendKind::Jira,
            base_url: "https://example.atlassian.net".into(),
            auth: AuthMaterial::Basic {
                email: "dev@example.com".into(),
                api_token: "tok".into(),
            },
            active: true,
            rate_limit_per_window: 100,
        }
    }

    #[test]
    fn resolve_by_explicit_id() {
        let store = Store::open_in_memory().unwrap();
        let tenant = store.create_tenant("acme").unwrap();
        let created = store.create_instance(sample_instance(tenant.id)).unwrap();

        let resolved = store.resolve_instance(tenant.id, Some(created.id)).unwrap();
        assert_eq!(resolved.id, created.id);
        assert_eq!(resolved.kind, BackendKind::Jira);
    }

    #[test]
    fn omitted_id_resolves_single_active_instance() {
        let store = Store::open_in_memory().unwrap();
        let tenant = store.create_tenant("acme").unwrap();
        let created = store.create_instance(sample_instance(tenant.id)).unwrap();

        let resolved = store.resolve_instance(tenant.id, None).unwrap();
        assert_eq!(resolved.id, created.id);
    }

    #[test]
    fn omitted_id_with_two_active_instances_is_ambiguous() {
        let store = Store::open_in_memory().unwrap();
        let tenant = store.create_tenant("acme").unwrap();
        store.create_instance(sample_instance(tenant.id)).unwrap();
        store.create_instance(sample_instance(tenant.id)).unwrap();

        let err = store.resolve_instance(tenant.id, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[test]
    fn inactive_instances_are_invisible() {
        let store = Store::open_in_memory().unwrap();
        let tenant = store.create_tenant("acme").unwrap();
        let created = store.create_instance(sample_instance(tenant.id)).unwrap();
        store
            .set_instance_active(tenant.id, created.id, false)
            .unwrap();

        let err = store
            .resolve_instance(tenant.id, Some(created.id))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        let err = store.resolve_instance(tenant.id, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn instances_are_tenant_scoped() {
        let store = Store::open_in_memory().unwrap();
        let acme = store.create_tenant("acme").unwrap();
        let rival = store.create_tenant("rival").unwrap();
        let created = store.create_instance(sample_instance(acme.id)).unwrap();

        let err = store
            .resolve_instance(rival.id, Some(created.id))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn credentials_round_trip_through_the_cipher() {
        let store = Store::open_in_memory().unwrap();
        let tenant = store.create_tenant("acme").unwrap();
        let created = store.create_instance(sample_instance(tenant.id)).unwrap();

        let resolved = store.resolve_instance(tenant.id, Some(created.id)).unwrap();
        let auth = store.credentials(&resolved).unwrap();
        assert_eq!(
            auth,
            AuthMaterial::Basic {
                email: "dev@example.com".into(),
                api_token: "tok".into(),
            }
        );
    }
}
