//! Known job keys. The counter store seeds one zeroed record per key on first use.

/// Category label for keys starting with `time_based`.
pub const TIME_BASED: &str = "time_based";
/// Category label for every other key.
pub const EVENT_BASED: &str = "event_based";

/// Periodic system monitor.
pub const SYSTEM_MONITOR: &str = "time_based_system_monitor";
/// Nightly log rotation.
pub const LOG_ROTATION: &str = "time_based_log_rotation";
/// Nightly backup.
pub const BACKUP: &str = "time_based_backup";
/// Weekly package update check.
pub const UPDATE_CHECK: &str = "time_based_update_check";
/// Weekly security scan.
pub const SECURITY_SCAN: &str = "time_based_security_scan";
/// Temporary file cleanup.
pub const CLEAN_TEMP: &str = "time_based_clean_temp";
/// Status report.
pub const STATUS_REPORT: &str = "time_based_status_report";
/// Database maintenance.
pub const DB_CLEANUP: &str = "time_based_db_cleanup";
/// Network reachability test.
pub const PING_TEST: &str = "time_based_ping_test";
/// Disk usage logging.
pub const LOG_DISK_USAGE: &str = "time_based_log_disk_usage";
/// Resource usage trend logging.
pub const RESOURCE_TREND: &str = "time_based_resource_trend";
/// Memory pressure check.
pub const MEMORY_LEAK_DETECTOR: &str = "time_based_memory_leak_detector";
/// Log file error scan.
pub const LOG_FILE_ANALYSIS: &str = "time_based_log_file_analysis";
/// Service liveness check.
pub const SERVICE_HEALTH_CHECK: &str = "time_based_service_health_check";
/// Sensor temperature check.
pub const TEMPERATURE_MONITORING: &str = "time_based_temperature_monitoring";
/// Job that always fails, used to exercise error accounting.
pub const INTENTIONAL_ERROR: &str = "time_based_intentional_error";

/// Console line that did not start with `click`.
pub const GENERIC_EVENT: &str = "event_based_generic";
/// Console line starting with `click`.
pub const CLICK_EVENT: &str = "event_based_click";
/// File created under the watched root.
pub const FILE_CREATED: &str = "file_created";
/// File modified under the watched root.
pub const FILE_MODIFIED: &str = "file_modified";
/// File deleted under the watched root.
pub const FILE_DELETED: &str = "file_deleted";
/// File moved under the watched root.
pub const FILE_MOVED: &str = "file_moved";
/// Critical configuration file modified.
pub const CONFIG_CHANGE: &str = "event_based_config_change";
/// USB device inserted.
pub const USB_INSERTION: &str = "event_based_usb_insertion";
/// USB device removed.
pub const USB_REMOVAL: &str = "event_based_usb_removal";
/// User login or logout.
pub const USER_EVENT: &str = "event_based_user_event";
/// Trigger file dropped into the watched root.
pub const TRIGGER_FILE: &str = "event_based_trigger_file";
/// Keyword scan of a modified file.
pub const KEYWORD_ALERT: &str = "event_based_keyword_alert";
/// Backup of a moved critical file.
pub const CONFIG_BACKUP: &str = "event_based_config_backup";
/// Network interface change.
pub const NETWORK_CHANGE: &str = "event_based_network_change";
/// Temperature threshold exceeded.
pub const TEMP_EXCEEDED: &str = "event_based_temp_exceeded";
/// Low disk space alert.
pub const DISK_LOW: &str = "event_based_disk_low";

/// Directory listing changed.
pub const DIRECTORY_CHANGE: &str = "os_directory_change";
/// Polled file attributes changed.
pub const FILE_ATTRIBUTE_CHANGE: &str = "os_file_attribute_change";
/// Free space below threshold on a polled mount.
pub const DISK_SPACE: &str = "os_disk_space";
/// Polled environment variable changed.
pub const ENV_CHANGE: &str = "os_env_change";

/// Every key seeded by `CounterStore::initialize`.
pub const KNOWN_KEYS: &[&str] = &[
    SYSTEM_MONITOR,
    LOG_ROTATION,
    BACKUP,
    UPDATE_CHECK,
    SECURITY_SCAN,
    CLEAN_TEMP,
    STATUS_REPORT,
    DB_CLEANUP,
    PING_TEST,
    LOG_DISK_USAGE,
    RESOURCE_TREND,
    MEMORY_LEAK_DETECTOR,
    LOG_FILE_ANALYSIS,
    SERVICE_HEALTH_CHECK,
    TEMPERATURE_MONITORING,
    INTENTIONAL_ERROR,
    GENERIC_EVENT,
    CLICK_EVENT,
    FILE_CREATED,
    FILE_MODIFIED,
    FILE_DELETED,
    FILE_MOVED,
    CONFIG_CHANGE,
    USB_INSERTION,
    USB_REMOVAL,
    USER_EVENT,
    TRIGGER_FILE,
    KEYWORD_ALERT,
    CONFIG_BACKUP,
    NETWORK_CHANGE,
    TEMP_EXCEEDED,
    DISK_LOW,
    DIRECTORY_CHANGE,
    FILE_ATTRIBUTE_CHANGE,
    DISK_SPACE,
    ENV_CHANGE,
];

/// Category a key is reported under.
pub fn category_of(key: &str) -> &'static str {
    if key.starts_with(TIME_BASED) { TIME_BASED } else { EVENT_BASED }
}
