use super::models::Config;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No tables configured (add at least one [[tables]] entry)")]
    NoTablesConfigured,

    #[error("Table name must not be empty")]
    EmptyTableName,

    #[error("Table name '{name}' must be `table` or `schema.table`")]
    InvalidTableName { name: String },

    #[error("Table '{name}' is configured more than once")]
    DuplicateTable { name: String },

    #[error("Protected partition '{partition}' of table '{table}' must not be empty")]
    EmptyProtectedName { table: String, partition: String },

    #[error("Runner period must be positive")]
    InvalidPeriod,

    #[error("Database max_connections must be positive")]
    InvalidMaxConnections,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_tables(config)?;
    validate_runner(config)?;
    validate_database(config)?;
    Ok(())
}

fn validate_tables(config: &Config) -> Result<(), ValidationError> {
    if config.tables.is_empty() {
        return Err(ValidationError::NoTablesConfigured);
    }

    let mut seen = HashSet::new();
    for table in &config.tables {
        if table.name.trim().is_empty() {
            return Err(ValidationError::EmptyTableName);
        }
        // partition names are derived from the parent, so each part must be usable on its own
        let parts: Vec<&str> = table.name.split('.').collect();
        if parts.len() > 2 || parts.iter().any(|part| part.trim().is_empty()) {
            return Err(ValidationError::InvalidTableName {
                name: table.name.clone(),
            });
        }
        if !seen.insert(table.name.as_str()) {
            return Err(ValidationError::DuplicateTable {
                name: table.name.clone(),
            });
        }
        if let Some(partition) = table.protected.iter().find(|p| p.trim().is_empty()) {
            return Err(ValidationError::EmptyProtectedName {
                table: table.name.clone(),
                partition: partition.clone(),
            });
        }
    }

    Ok(())
}

fn validate_runner(config: &Config) -> Result<(), ValidationError> {
    if config.runner.period.is_zero() {
        return Err(ValidationError::InvalidPeriod);
    }
    Ok(())
}

fn validate_database(config: &Config) -> Result<(), ValidationError> {
    if config.database.max_connections == 0 {
        return Err(ValidationError::InvalidMaxConnections);
    }
    Ok(())
}
