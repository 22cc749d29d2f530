use crate::calc::ScaleConfig;
use crate::config::Config;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const MAX_IMPORT_ROWS_LIMIT: i64 = 100_000;

#[derive(Clone, Copy)]
enum SetupSection {
    Scale,
    Import,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "scale" => Some(Self::Scale),
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scale => "setup.scale",
            Self::Import => "setup.import",
        }
    }
}

/// Section defaults come from the workspace config file.
fn default_section(section: SetupSection, config: &Config) -> Value {
    match section {
        SetupSection::Scale => {
            let s = config.scale();
            json!({
                "minGrade": s.min_grade,
                "passPercentage": s.pass_percentage,
                "maxGrade": s.max_grade
            })
        }
        SetupSection::Import => json!({
            "maxRows": config.import.max_rows
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_f64(v: &Value, key: &str) -> Result<f64, String> {
    match v.as_f64() {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(format!("{} must be a number", key)),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Scale => match k.as_str() {
                "minGrade" | "maxGrade" => {
                    obj.insert(k.clone(), Value::from(parse_f64(v, k)?));
                }
                "passPercentage" => {
                    let p = parse_f64(v, k)?;
                    if !(0.0..=100.0).contains(&p) {
                        return Err("passPercentage must be in 0..=100".into());
                    }
                    obj.insert(k.clone(), Value::from(p));
                }
                _ => return Err(format!("unknown scale field: {}", k)),
            },
            SetupSection::Import => match k.as_str() {
                "maxRows" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, MAX_IMPORT_ROWS_LIMIT)?),
                    );
                }
                _ => return Err(format!("unknown import field: {}", k)),
            },
        }
    }
    // Cross-field checks once every key is in place.
    if let SetupSection::Scale = section {
        scale_from_value(current)?;
    }
    Ok(())
}

fn scale_from_value(v: &Value) -> Result<ScaleConfig, String> {
    let scale: ScaleConfig =
        serde_json::from_value(v.clone()).map_err(|e| format!("invalid scale: {e}"))?;
    scale.validate()?;
    Ok(scale)
}

fn load_section(conn: &Connection, section: SetupSection, config: &Config) -> anyhow::Result<Value> {
    let mut current = default_section(section, config);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Keep defaults if the stored value no longer validates.
            let mut merged = current.clone();
            if merge_section_patch(section, &mut merged, saved_obj).is_ok() {
                current = merged;
            } else {
                tracing::warn!("ignoring invalid stored {}", section.key());
            }
        }
    }
    Ok(current)
}

/// A `scale` object given on a request, merged over the stored `setup.scale`,
/// which in turn sits over the config file scale.
pub fn requested_scale(
    conn: &Connection,
    config: &Config,
    patch: Option<&Value>,
) -> Result<ScaleConfig, String> {
    let mut current =
        load_section(conn, SetupSection::Scale, config).map_err(|e| e.to_string())?;
    match patch {
        None | Some(Value::Null) => {}
        Some(Value::Object(p)) => merge_section_patch(SetupSection::Scale, &mut current, p)?,
        Some(_) => return Err("scale must be an object".into()),
    }
    scale_from_value(&current)
}

pub fn effective_max_rows(conn: &Connection, config: &Config) -> anyhow::Result<usize> {
    let v = load_section(conn, SetupSection::Import, config)?;
    Ok(v.get("maxRows")
        .and_then(|n| n.as_u64())
        .map(|n| n as usize)
        .unwrap_or(config.import.max_rows))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scale = match load_section(conn, SetupSection::Scale, &state.config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_error", e.to_string(), None),
    };
    let import = match load_section(conn, SetupSection::Import, &state.config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_error", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "scale": scale,
            "import": import
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section, &state.config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_error", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_error", e.to_string(), None);
    }
    tracing::info!("updated {}", section.key());
    let mut result = json!({ "ok": true });
    result[section_raw] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn stored_scale_overrides_config_and_request_overrides_both() {
        let conn = mem();
        let config = Config::default();
        assert_eq!(
            requested_scale(&conn, &config, None).expect("scale"),
            ScaleConfig::default()
        );

        db::settings_set_json(&conn, "setup.scale", &json!({ "passPercentage": 50.0 }))
            .expect("store");
        assert_eq!(
            requested_scale(&conn, &config, None).expect("scale").pass_percentage,
            50.0
        );

        let s = requested_scale(&conn, &config, Some(&json!({ "maxGrade": 6.0 })))
            .expect("requested");
        assert_eq!(s.pass_percentage, 50.0);
        assert_eq!(s.max_grade, 6.0);
    }

    #[test]
    fn invalid_scale_patches_are_rejected() {
        let conn = mem();
        let config = Config::default();
        assert!(requested_scale(&conn, &config, Some(&json!({ "minGrade": 4.5 }))).is_err());
        assert!(requested_scale(&conn, &config, Some(&json!({ "passPercentage": 101 }))).is_err());
        assert!(requested_scale(&conn, &config, Some(&json!({ "bogus": 1 }))).is_err());
        assert!(requested_scale(&conn, &config, Some(&json!(7))).is_err());
    }

    #[test]
    fn invalid_stored_scale_falls_back_to_config() {
        let conn = mem();
        db::settings_set_json(&conn, "setup.scale", &json!({ "maxGrade": 3.0 })).expect("store");
        assert_eq!(
            requested_scale(&conn, &Config::default(), Some(&Value::Null)).expect("scale"),
            ScaleConfig::default()
        );
    }

    #[test]
    fn max_rows_prefers_stored_setting() {
        let conn = mem();
        let config = Config::default();
        assert_eq!(effective_max_rows(&conn, &config).expect("rows"), 5000);
        db::settings_set_json(&conn, "setup.import", &json!({ "maxRows": 3 })).expect("store");
        assert_eq!(effective_max_rows(&conn, &config).expect("rows"), 3);
    }
}
