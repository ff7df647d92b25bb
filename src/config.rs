//! INI-loaded configuration for both peers.
//!
//! Field names and defaults mirror `examples/original_source/config.h`
//! and the `ini_load`/`ini_sget` calls in
//! `examples/original_source/manager.c`. Per spec.md §7, any key that is
//! present in the file but invalid (non-positive where a positive integer
//! is required, empty path, etc.) aborts loading rather than silently
//! falling back to the default — only a genuinely *absent* key uses the
//! default.

use std::path::PathBuf;

use ini::Ini;

use crate::error::ConfigError;

/// `./supermarket.ini` unless overridden by `--config`.
pub const DEFAULT_SUPERMARKET_CONFIG_PATH: &str = "./supermarket.ini";
/// `./manager.ini` unless overridden by `--config`.
pub const DEFAULT_MANAGER_CONFIG_PATH: &str = "./manager.ini";
/// Matches `examples/original_source/config.h`'s `DEFAULT_SOCK_PATH`.
pub const DEFAULT_SOCKET_PATH: &str = "./orders.sock";

/// Configuration for the Supermarket (worker-pool host) peer.
#[derive(Debug, Clone)]
pub struct SupermarketConfig {
    /// K — number of registers.
    pub num_cashiers: usize,
    /// C — population cap.
    pub cust_cap: u32,
    /// E — admission batch size.
    pub cust_batch: u32,
    /// T — max shopping time, ms. Each customer draws in `[10, T]`.
    pub max_shopping_time_ms: u64,
    /// P — max products per customer. Each customer draws in `[0, P]`.
    pub product_cap: u32,
    pub time_per_prod_ms: u64,
    pub cashier_poll_time_ms: u64,
    pub supermarket_poll_time_ms: u64,
    pub max_conn_attempts: u32,
    pub conn_attempt_delay_ms: u64,
    /// Reshuffle tick period. Not in the original source; exposed per
    /// spec.md §9's recommendation.
    pub reshuffle_period_ms: u64,
    /// Per-customer Bernoulli probability of being reshuffled each tick.
    /// Hard-coded to 1/4 in the informal design; exposed here per
    /// spec.md §9's Open Question (see DESIGN.md).
    pub reshuffle_fraction: f64,
    pub socket_path: PathBuf,
    /// Where per-cashier/per-customer statistics lines are appended.
    pub stats_log_path: PathBuf,
}

impl Default for SupermarketConfig {
    fn default() -> Self {
        Self {
            num_cashiers: 2,
            cust_cap: 20,
            cust_batch: 5,
            max_shopping_time_ms: 500,
            product_cap: 80,
            time_per_prod_ms: 4,
            cashier_poll_time_ms: 80,
            supermarket_poll_time_ms: 10,
            max_conn_attempts: 10,
            conn_attempt_delay_ms: 500,
            reshuffle_period_ms: 80,
            reshuffle_fraction: 0.25,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            stats_log_path: PathBuf::from("./supermarket.log"),
        }
    }
}

impl SupermarketConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let ini = load_ini(path)?;
        let defaults = Self::default();

        Ok(Self {
            num_cashiers: get_positive_usize(&ini, "num_cashiers", defaults.num_cashiers)?,
            cust_cap: get_positive_u32(&ini, "cust_cap", defaults.cust_cap)?,
            cust_batch: get_positive_u32(&ini, "cust_batch", defaults.cust_batch)?,
            max_shopping_time_ms: get_positive_u64(
                &ini,
                "max_shopping_time",
                defaults.max_shopping_time_ms,
            )?,
            product_cap: get_positive_u32(&ini, "product_cap", defaults.product_cap)?,
            time_per_prod_ms: get_positive_u64(
                &ini,
                "time_per_prod",
                defaults.time_per_prod_ms,
            )?,
            cashier_poll_time_ms: get_positive_u64(
                &ini,
                "cashier_poll_time",
                defaults.cashier_poll_time_ms,
            )?,
            supermarket_poll_time_ms: get_positive_u64(
                &ini,
                "supermarket_poll_time",
                defaults.supermarket_poll_time_ms,
            )?,
            max_conn_attempts: get_positive_u32(
                &ini,
                "max_conn_attempts",
                defaults.max_conn_attempts,
            )?,
            conn_attempt_delay_ms: get_positive_u64(
                &ini,
                "conn_attempt_delay",
                defaults.conn_attempt_delay_ms,
            )?,
            reshuffle_period_ms: get_positive_u64(
                &ini,
                "reshuffle_period_ms",
                defaults.reshuffle_period_ms,
            )?,
            reshuffle_fraction: get_fraction(
                &ini,
                "reshuffle_fraction",
                defaults.reshuffle_fraction,
            )?,
            socket_path: get_path(&ini, "socket_path", &defaults.socket_path)?,
            stats_log_path: get_path(&ini, "stats_log_path", &defaults.stats_log_path)?,
        })
    }
}

/// Configuration for the Manager (controller) peer.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// K — number of registers the connecting Supermarket exposes. Must
    /// agree with the Supermarket's own `num_cashiers`.
    pub num_cashiers: usize,
    /// P — max concurrent Supermarket connections served.
    pub manager_pool_size: u32,
    /// S1 — undercrowd threshold.
    pub undercrowded_cash_treshold: u32,
    /// S2 — overcrowd threshold.
    pub overcrowded_cash_treshold: i64,
    pub socket_path: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            num_cashiers: 2,
            manager_pool_size: 2,
            undercrowded_cash_treshold: 2,
            overcrowded_cash_treshold: 10,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

impl ManagerConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let ini = load_ini(path)?;
        let defaults = Self::default();

        Ok(Self {
            num_cashiers: get_positive_usize(&ini, "num_cashiers", defaults.num_cashiers)?,
            manager_pool_size: get_positive_u32(
                &ini,
                "manager_pool_size",
                defaults.manager_pool_size,
            )?,
            undercrowded_cash_treshold: get_positive_u32(
                &ini,
                "undercrowded_cash_treshold",
                defaults.undercrowded_cash_treshold,
            )?,
            overcrowded_cash_treshold: get_positive_i64(
                &ini,
                "overcrowded_cash_treshold",
                defaults.overcrowded_cash_treshold,
            )?,
            socket_path: get_path(&ini, "socket_path", &defaults.socket_path)?,
        })
    }
}

fn load_ini(path: &std::path::Path) -> Result<Ini, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Read {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
        });
    }
    Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn raw(ini: &Ini, key: &str) -> Option<String> {
    ini.general_section().get(key).map(str::to_owned)
}

fn get_positive_u32(ini: &Ini, key: &str, default: u32) -> Result<u32, ConfigError> {
    match raw(ini, key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| ConfigError::NotPositive {
                key: key.to_string(),
                value,
            }),
    }
}

fn get_positive_usize(ini: &Ini, key: &str, default: usize) -> Result<usize, ConfigError> {
    get_positive_u32(ini, key, default as u32).map(|v| v as usize)
}

fn get_positive_u64(ini: &Ini, key: &str, default: u64) -> Result<u64, ConfigError> {
    match raw(ini, key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| ConfigError::NotPositive {
                key: key.to_string(),
                value,
            }),
    }
}

fn get_positive_i64(ini: &Ini, key: &str, default: i64) -> Result<i64, ConfigError> {
    match raw(ini, key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| ConfigError::NotPositive {
                key: key.to_string(),
                value,
            }),
    }
}

fn get_fraction(ini: &Ini, key: &str, default: f64) -> Result<f64, ConfigError> {
    match raw(ini, key) {
        None => Ok(default),
        Some(value) => {
            let parsed: f64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    key: key.to_string(),
                    value: value.clone(),
                    reason: "not a number".to_string(),
                })?;
            if !(0.0..=1.0).contains(&parsed) {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value,
                    reason: "must be in [0.0, 1.0]".to_string(),
                });
            }
            Ok(parsed)
        }
    }
}

fn get_path(ini: &Ini, key: &str, default: &std::path::Path) -> Result<PathBuf, ConfigError> {
    match raw(ini, key) {
        None => Ok(default.to_path_buf()),
        Some(value) if value.trim().is_empty() => Err(ConfigError::Invalid {
            key: key.to_string(),
            value,
            reason: "must not be empty".to_string(),
        }),
        Some(value) => Ok(PathBuf::from(value.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_used_when_keys_absent() {
        let file = write_ini("socket_path = ./test.sock\n");
        let cfg = SupermarketConfig::load(file.path()).unwrap();
        assert_eq!(cfg.num_cashiers, 2);
        assert_eq!(cfg.cust_cap, 20);
        assert_eq!(cfg.socket_path, PathBuf::from("./test.sock"));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let file = write_ini("num_cashiers = 4\ncust_cap = 8\ncust_batch = 8\n");
        let cfg = SupermarketConfig::load(file.path()).unwrap();
        assert_eq!(cfg.num_cashiers, 4);
        assert_eq!(cfg.cust_cap, 8);
        assert_eq!(cfg.cust_batch, 8);
    }

    #[test]
    fn non_positive_present_value_aborts() {
        let file = write_ini("cust_cap = 0\n");
        let err = SupermarketConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotPositive { .. }));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = SupermarketConfig::load(std::path::Path::new("/no/such/file.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn reshuffle_fraction_out_of_range_aborts() {
        let file = write_ini("reshuffle_fraction = 1.5\n");
        let err = SupermarketConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn manager_config_defaults() {
        let file = write_ini("manager_pool_size = 3\n");
        let cfg = ManagerConfig::load(file.path()).unwrap();
        assert_eq!(cfg.manager_pool_size, 3);
        assert_eq!(cfg.undercrowded_cash_treshold, 2);
        assert_eq!(cfg.overcrowded_cash_treshold, 10);
    }
}
