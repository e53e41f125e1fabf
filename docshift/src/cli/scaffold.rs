//! Generation of new unit files and their module declarations.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::unit::validate_unit_id;

/// Generated unit file
#[derive(Debug)]
pub struct UnitFile {
    pub unit_id: String,
    /// Filename (without path)
    pub filename: String,
    /// Module name (valid Rust identifier)
    pub module_name: String,
    pub content: String,
}

/// Lowercase a free-form name into `[a-z0-9_]`, collapsing separators.
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c.to_ascii_lowercase());
        } else if !sanitized.ends_with('_') {
            sanitized.push('_');
        }
    }
    sanitized.trim_matches('_').to_string()
}

/// Build the id, filename and template for a new unit.
pub fn generate_unit_file(name: &str, timestamp: DateTime<Utc>) -> Result<UnitFile> {
    let name = sanitize_name(name);
    if name.is_empty() {
        bail!("Unit name must contain at least one letter or digit");
    }

    let unit_id = format!("{}_{name}", timestamp.format("%Y%m%d%H%M%S"));
    validate_unit_id(&unit_id)?;

    let mut content = String::new();
    let _ = writeln!(content, "// Unit: {unit_id}");
    let _ = writeln!(content, "// Generated: {}", timestamp.format("%Y-%m-%dT%H:%M:%SZ"));
    let _ = writeln!(content);
    let _ = writeln!(content, "use docshift::register_unit;");
    let _ = writeln!(content, "use docshift::unit::{{MigrationUnit, Step, StepUnit}};");
    let _ = writeln!(content);
    let _ = writeln!(content, "fn unit() -> Box<dyn MigrationUnit> {{");
    let _ = writeln!(content, "    let steps: Vec<Step> = vec![");
    let _ = writeln!(
        content,
        "        // Step::add_field(\"collection\", \"field\", serde_json::Value::Null),"
    );
    let _ = writeln!(content, "    ];");
    let _ = writeln!(
        content,
        "    Box::new(StepUnit::new(\"{unit_id}\", steps).describe(\"{}\"))",
        name.replace('_', " ")
    );
    let _ = writeln!(content, "}}");
    let _ = writeln!(content);
    let _ = writeln!(content, "register_unit!(unit);");

    Ok(UnitFile {
        filename: format!("{unit_id}.rs"),
        module_name: format!("_{unit_id}"),
        unit_id,
        content,
    })
}

/// Write the unit file and declare it in `mod.rs`. Returns the new file's path.
pub fn write_unit_file(units_dir: &Path, file: &UnitFile) -> Result<PathBuf> {
    std::fs::create_dir_all(units_dir)
        .with_context(|| format!("Failed to create {}", units_dir.display()))?;

    let path = units_dir.join(&file.filename);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    std::fs::write(&path, &file.content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    update_units_mod(units_dir, file)?;
    Ok(path)
}

/// Add a module declaration for `file` after the existing ones in `mod.rs`.
pub fn update_units_mod(units_dir: &Path, file: &UnitFile) -> Result<()> {
    let mod_path = units_dir.join("mod.rs");

    let content = if mod_path.exists() {
        std::fs::read_to_string(&mod_path)
            .with_context(|| format!("Failed to read {}", mod_path.display()))?
    } else {
        "//! Migration units, registered at link time.\n\n".to_string()
    };

    let mod_decl = format!("mod {};", file.module_name);
    if content.contains(&mod_decl) {
        return Ok(());
    }

    // After the last mod line, or after the header comments when there is none
    let mut insert_pos = None;
    let mut offset = 0;
    for line in content.lines() {
        offset += line.len() + 1;
        if line.trim().starts_with("mod ") && line.contains(';') {
            insert_pos = Some(offset);
        }
    }
    let insert_pos = insert_pos.unwrap_or_else(|| {
        let mut offset = 0;
        for line in content.lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with("//") {
                return offset;
            }
            offset += line.len() + 1;
        }
        content.len()
    });
    let insert_pos = insert_pos.min(content.len());

    let new_content = format!(
        "{}#[path = \"{}\"]\n{mod_decl}\n{}",
        &content[..insert_pos],
        file.filename,
        &content[insert_pos..]
    );

    std::fs::write(&mod_path, new_content)
        .with_context(|| format!("Failed to write {}", mod_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 11, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(
            sanitize_name("seed advent calendar"),
            "seed_advent_calendar"
        );
        assert_eq!(sanitize_name("Drop-Legacy  Text"), "drop_legacy_text");
        assert_eq!(sanitize_name("--"), "");
    }

    #[test]
    fn test_generate_unit_file() {
        let file = generate_unit_file("Seed advent calendar", timestamp()).unwrap();
        assert_eq!(file.unit_id, "20231120120000_seed_advent_calendar");
        assert_eq!(file.filename, "20231120120000_seed_advent_calendar.rs");
        assert_eq!(file.module_name, "_20231120120000_seed_advent_calendar");
        assert!(file.content.contains("StepUnit::new(\"20231120120000_seed_advent_calendar\""));
        assert!(file.content.contains("register_unit!(unit);"));
    }

    #[test]
    fn test_generate_rejects_empty_name() {
        assert!(generate_unit_file("!!", timestamp()).is_err());
    }

    #[test]
    fn test_write_appends_after_existing_mods() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mod.rs"),
            "//! Units.\n\n#[path = \"20230101000000_a.rs\"]\nmod _20230101000000_a;\n",
        )
        .unwrap();

        let file = generate_unit_file("b", timestamp()).unwrap();
        let path = write_unit_file(dir.path(), &file).unwrap();
        assert!(path.exists());

        let module = std::fs::read_to_string(dir.path().join("mod.rs")).unwrap();
        assert_eq!(
            module,
            "//! Units.\n\n#[path = \"20230101000000_a.rs\"]\nmod _20230101000000_a;\n\
             #[path = \"20231120120000_b.rs\"]\nmod _20231120120000_b;\n"
        );

        // Second declaration is a no-op; second write refuses to clobber
        update_units_mod(dir.path(), &file).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("mod.rs")).unwrap(),
            module
        );
        assert!(write_unit_file(dir.path(), &file).is_err());
    }

    #[test]
    fn test_write_creates_mod_file() {
        let dir = tempfile::tempdir().unwrap();
        let units = dir.path().join("src").join("units");
        let file = generate_unit_file("first", timestamp()).unwrap();
        write_unit_file(&units, &file).unwrap();

        let module = std::fs::read_to_string(units.join("mod.rs")).unwrap();
        assert!(module.starts_with("//! Migration units"));
        assert!(
            module.ends_with("#[path = \"20231120120000_first.rs\"]\nmod _20231120120000_first;\n")
        );
    }
}
