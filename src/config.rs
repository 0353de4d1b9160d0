use crate::host::SettingsSource;
use crate::server::ServerConfig;
use crate::types::Role;

pub const MAIN_SETTINGS_SECTION: &str = "driver_simplecontroller";
pub const LEFT_SETTINGS_SECTION: &str = "driver_simplecontroller_left_controller";
pub const RIGHT_SETTINGS_SECTION: &str = "driver_simplecontroller_right_controller";
pub const KEY_MODEL_NUMBER: &str = "mycontroller_model_number";
pub const KEY_SERIAL_NUMBER: &str = "mycontroller_serial_number";

pub const ENV_BIND_ADDR: &str = "SIMPLECONTROLLER_BIND_ADDR";
pub const ENV_PORT_LEFT: &str = "SIMPLECONTROLLER_PORT_LEFT";
pub const ENV_PORT_RIGHT: &str = "SIMPLECONTROLLER_PORT_RIGHT";

/// Per-instance settings, resolved once when the driver is constructed.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub role: Role,
    pub model_number: String,
    pub serial_number: String,
    pub server: ServerConfig,
}

impl DriverConfig {
    /// Read model/serial from `settings` and network overrides from the
    /// environment. Missing settings become empty strings.
    pub fn load(role: Role, settings: &dyn SettingsSource) -> DriverConfig {
        let role_section = match role {
            Role::Left => LEFT_SETTINGS_SECTION,
            Role::Right => RIGHT_SETTINGS_SECTION,
        };
        let model_number = settings
            .get_string(MAIN_SETTINGS_SECTION, KEY_MODEL_NUMBER)
            .unwrap_or_default();
        let serial_number = settings
            .get_string(role_section, KEY_SERIAL_NUMBER)
            .unwrap_or_default();

        let mut server = ServerConfig::for_role(role);
        server.bind_addr = read_env_parsed(ENV_BIND_ADDR, server.bind_addr);
        let port_var = match role {
            Role::Left => ENV_PORT_LEFT,
            Role::Right => ENV_PORT_RIGHT,
        };
        server.port = read_env_parsed(port_var, server.port);

        log::info!("My Controller ({}) Model Number: {}", role, model_number);
        log::info!("My Controller ({}) Serial Number: {}", role, serial_number);

        DriverConfig {
            role,
            model_number,
            serial_number,
            server,
        }
    }

    /// Defaults only: empty identifiers, well-known port on all interfaces.
    pub fn for_role(role: Role) -> DriverConfig {
        DriverConfig {
            role,
            model_number: String::new(),
            serial_number: String::new(),
            server: ServerConfig::for_role(role),
        }
    }
}

fn read_env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
