use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use framegen_types::DataPoint;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::debug;

use crate::{max_version, Catalog, CatalogError, CatalogSource, CatalogTool, SelectedCatalog};

/// SQLite-backed catalog (the migrated reference database).
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Opens a catalog file read-only. The file must already exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn rows(&self, sql: &str, params: Vec<Value>, width: usize) -> Result<Vec<Vec<Value>>, CatalogError> {
        let conn = self.conn.lock().map_err(|_| CatalogError::Poisoned)?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| {
            (0..width).map(|i| row.get::<_, Value>(i)).collect::<Result<Vec<_>, _>>()
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// Migrated catalogs store numbers and flags as text in some columns.
fn as_i64(value: &Value, column: &str) -> Result<i64, CatalogError> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Real(f) => Ok(*f as i64),
        Value::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| CatalogError::Malformed(format!("{column} is not an integer: {s}"))),
        _ => Err(CatalogError::Malformed(format!("{column} is empty"))),
    }
}

fn as_bool(value: &Value, column: &str) -> Result<bool, CatalogError> {
    match value {
        Value::Text(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::Text(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => as_i64(other, column).map(|v| v != 0),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        _ => None,
    }
}

impl Catalog for SqliteCatalog {
    fn tools_by_display_name(&self, names: &[String]) -> Result<Vec<CatalogTool>, CatalogError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT Tool.ToolID, Tool.DisplayToolName, Tool.LTBAddress, Tool.IsMWDTool, \
             Tool.DPointNameSuffix, ToolVersion.Version \
             FROM Tool LEFT JOIN ToolVersion ON ToolVersion.ToolID = Tool.ToolID \
             WHERE Tool.DisplayToolName IN ({})",
            placeholders(names.len())
        );
        let params = names.iter().cloned().map(Value::Text).collect();
        let rows = self.rows(&sql, params, 6)?;

        // One entry per tool id, keeping every version seen for it.
        let mut grouped: BTreeMap<String, (CatalogTool, Vec<String>)> = BTreeMap::new();
        for row in rows {
            let tool_id = as_text(&row[0]).ok_or_else(|| CatalogError::Malformed("ToolID is empty".into()))?;
            let version = as_text(&row[5]);
            let entry = match grouped.entry(tool_id) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    let tool = CatalogTool {
                        tool_id: vacant.key().clone(),
                        display_name: as_text(&row[1]).unwrap_or_default(),
                        ltb_addr: as_i64(&row[2], "LTBAddress")?,
                        is_mwd: as_bool(&row[3], "IsMWDTool")?,
                        suffix: as_text(&row[4]).unwrap_or_default(),
                        latest_version: None,
                    };
                    vacant.insert((tool, Vec::new()))
                }
            };
            if let Some(version) = version {
                entry.1.push(version);
            }
        }

        let tools = grouped
            .into_values()
            .map(|(mut tool, versions)| {
                tool.latest_version = max_version(versions.iter().map(String::as_str)).map(str::to_string);
                tool
            })
            .collect::<Vec<_>>();
        debug!(requested = names.len(), found = tools.len(), "catalog tool lookup");
        Ok(tools)
    }

    fn latest_tool_version(&self, tool_id: &str) -> Result<Option<String>, CatalogError> {
        let rows = self.rows(
            "SELECT Version FROM ToolVersion WHERE ToolID = ?",
            vec![Value::Text(tool_id.to_string())],
            1,
        )?;
        let versions: Vec<String> = rows.iter().filter_map(|r| as_text(&r[0])).collect();
        Ok(max_version(versions.iter().map(String::as_str)).map(str::to_string))
    }

    fn data_points(&self, names: &[String], ltb_addrs: &[i64]) -> Result<Vec<DataPoint>, CatalogError> {
        if names.is_empty() || ltb_addrs.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DPoint.DPOINT_NAME, DPoint.DPOINT_DATPID, DPoint.NO_OF_BITS, Tool.IsMWDTool, \
             DPoint.TOOL_LTB_ADDR, DPoint.DPOINT_SHORT_DESCRIPTION \
             FROM DPoint INNER JOIN Tool ON Tool.LTBAddress = DPoint.TOOL_LTB_ADDR \
             WHERE DPoint.TOOL_LTB_ADDR IN ({}) AND DPoint.DPOINT_NAME IN ({}) \
             ORDER BY DPoint.DPOINT_NAME ASC",
            placeholders(ltb_addrs.len()),
            placeholders(names.len())
        );
        let params = ltb_addrs
            .iter()
            .map(|a| Value::Integer(*a))
            .chain(names.iter().cloned().map(Value::Text))
            .collect();
        let rows = self.rows(&sql, params, 6)?;

        rows.iter()
            .map(|row| {
                Ok(DataPoint {
                    name: as_text(&row[0]).unwrap_or_default(),
                    catalog_id: as_i64(&row[1], "DPOINT_DATPID")?,
                    bit_length: as_i64(&row[2], "NO_OF_BITS")?,
                    is_mwd: as_bool(&row[3], "IsMWDTool")?,
                    ltb_addr: as_i64(&row[4], "TOOL_LTB_ADDR")?,
                    description: as_text(&row[5]).unwrap_or_default(),
                    time: None,
                    depth: None,
                })
            })
            .collect()
    }
}

/// Opens catalog files from a directory, one connection per request.
pub struct SqliteCatalogSource {
    dir: PathBuf,
}

impl SqliteCatalogSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CatalogSource for SqliteCatalogSource {
    fn open(&self, selected: &SelectedCatalog) -> Result<Arc<dyn Catalog>, CatalogError> {
        let path = self.dir.join(&selected.file);
        debug!(path = %path.display(), "opening catalog");
        Ok(Arc::new(SqliteCatalog::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "
        CREATE TABLE Tool (ToolID TEXT, DisplayToolName TEXT, LTBAddress TEXT, IsMWDTool TEXT, DPointNameSuffix TEXT);
        CREATE TABLE ToolVersion (ToolID TEXT, Version TEXT);
        CREATE TABLE DPoint (DPOINT_NAME TEXT, DPOINT_DATPID INTEGER, NO_OF_BITS INTEGER, TOOL_LTB_ADDR INTEGER, DPOINT_SHORT_DESCRIPTION TEXT);
        INSERT INTO Tool VALUES ('IMPTOOL', 'IMP', '137', '1', '');
        INSERT INTO Tool VALUES ('MXWPTOOL', 'MXWP', '19', '0', '_mx');
        INSERT INTO ToolVersion VALUES ('IMPTOOL', '80'), ('IMPTOOL', '160'), ('MXWPTOOL', '9.4'), ('MXWPTOOL', '10.0');
        INSERT INTO DPoint VALUES ('sticknslip', 4650, 8, 137, 'Stick slip');
        INSERT INTO DPoint VALUES ('rgx', 4504, 12, 137, NULL);
        INSERT INTO DPoint VALUES ('SHKLV_mx', 4922, 4, 19, 'Shock level');
        INSERT INTO DPoint VALUES ('orphan', 1, 4, 55, 'No tool');
    ";

    fn catalog() -> SqliteCatalog {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        SqliteCatalog::from_connection(conn)
    }

    #[test]
    fn tools_carry_numeric_latest_version() {
        let tools = catalog()
            .tools_by_display_name(&["IMP".into(), "MXWP".into(), "NOPE".into()])
            .unwrap();
        assert_eq!(tools.len(), 2);
        let imp = tools.iter().find(|t| t.tool_id == "IMPTOOL").unwrap();
        assert_eq!(imp.ltb_addr, 137);
        assert!(imp.is_mwd);
        assert_eq!(imp.latest_version.as_deref(), Some("160"));
        let mx = tools.iter().find(|t| t.tool_id == "MXWPTOOL").unwrap();
        assert!(!mx.is_mwd);
        assert_eq!(mx.latest_version.as_deref(), Some("10.0"));
    }

    #[test]
    fn latest_version_for_unknown_tool_is_none() {
        let cat = catalog();
        assert_eq!(cat.latest_tool_version("IMPTOOL").unwrap().as_deref(), Some("160"));
        assert_eq!(cat.latest_tool_version("GHOST").unwrap(), None);
    }

    #[test]
    fn data_points_filter_by_name_and_address() {
        let points = catalog()
            .data_points(
                &["rgx".into(), "sticknslip".into(), "SHKLV_mx".into(), "orphan".into()],
                &[137],
            )
            .unwrap();
        let names: Vec<&str> = points.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["rgx", "sticknslip"]);
        assert_eq!(points[0].description, "");
        assert!(points[0].is_mwd);
    }

    #[test]
    fn empty_inputs_skip_the_query() {
        let cat = catalog();
        assert!(cat.data_points(&[], &[137]).unwrap().is_empty());
        assert!(cat.data_points(&["rgx".into()], &[]).unwrap().is_empty());
        assert!(cat.tools_by_display_name(&[]).unwrap().is_empty());
    }

    #[test]
    fn missing_catalog_file_fails_to_open() {
        let source = SqliteCatalogSource::new("/nonexistent/catalogs");
        let selected = SelectedCatalog {
            file: "missing.db".into(),
            qc_code: None,
        };
        assert!(source.open(&selected).is_err());
    }
}
