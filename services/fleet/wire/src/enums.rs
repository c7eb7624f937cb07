//! Device enumerations.
//!
//! Enum fields stay raw `i32` inside messages so values unknown to this build
//! still decode; these types give them names for rendering and command input.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Name lookup shared by all device enumerations
pub trait WireEnum: Sized + Copy {
    /// Family prefix shared by every label
    const PREFIX: &'static str;

    /// Map a raw wire value
    fn from_i32(value: i32) -> Option<Self>;

    /// Device label, e.g. `SYS_REBOOT`
    fn label(&self) -> &'static str;

    /// Look up by label, with or without the family prefix, ignoring case
    fn from_name(name: &str) -> Option<Self>;

    /// Label without the family prefix, e.g. `REBOOT`
    fn name(&self) -> &'static str {
        let label = self.label();
        label.strip_prefix(Self::PREFIX).unwrap_or(label)
    }
}

/// Serialize a raw enum field as its label, or the number if unknown
pub fn serialize_enum<E: WireEnum, S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
    match E::from_i32(*value) {
        Some(known) => serializer.serialize_str(known.label()),
        None => serializer.serialize_i32(*value),
    }
}

/// Deserialize an enumeration from its name or raw number
///
/// Accepts `"SYS_REBOOT"`, `"reboot"` or `1`.
pub fn deserialize_enum<'de, E: WireEnum, D: Deserializer<'de>>(deserializer: D) -> Result<E, D::Error> {
    struct EnumVisitor<E>(std::marker::PhantomData<E>);

    impl<'de, E: WireEnum> Visitor<'de> for EnumVisitor<E> {
        type Value = E;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a {}* name or number", E::PREFIX)
        }

        fn visit_str<X: de::Error>(self, value: &str) -> Result<E, X> {
            E::from_name(value).ok_or_else(|| X::custom(format!("unknown name '{}'", value)))
        }

        fn visit_i64<X: de::Error>(self, value: i64) -> Result<E, X> {
            i32::try_from(value)
                .ok()
                .and_then(E::from_i32)
                .ok_or_else(|| X::custom(format!("unknown value {}", value)))
        }

        fn visit_u64<X: de::Error>(self, value: u64) -> Result<E, X> {
            i64::try_from(value)
                .map_err(|_| X::custom(format!("unknown value {}", value)))
                .and_then(|v| self.visit_i64(v))
        }
    }

    deserializer.deserialize_any(EnumVisitor(std::marker::PhantomData))
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($prefix:literal) {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal => $label:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[repr(i32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $label)]
                $variant = $value,
            )+
        }

        impl WireEnum for $name {
            const PREFIX: &'static str = $prefix;

            fn from_i32(value: i32) -> Option<Self> {
                match value {
                    $( $value => Some(Self::$variant), )+
                    _ => None,
                }
            }

            fn label(&self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                let upper = name.trim().to_ascii_uppercase();
                let prefixed = format!("{}{}", $prefix, upper);
                [upper.as_str(), prefixed.as_str()].iter().find_map(|candidate| match *candidate {
                    $( $label => Some(Self::$variant), )+
                    _ => None,
                })
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

wire_enum! {
    /// Alarm source
    pub enum AlarmType ("ALARM_") {
        /// Unclassified
        Unknown = 0 => "ALARM_UNKNOWN",
        /// Panic button 1
        Panic1 = 1 => "ALARM_PANIC1",
        /// Panic button 2
        Panic2 = 2 => "ALARM_PANIC2",
        /// Enclosure tamper switch
        Tamper = 3 => "ALARM_TAMPER",
        /// Fire input
        Fire = 4 => "ALARM_FIRE",
        /// Intrusion input
        Intrusion = 5 => "ALARM_INTRUSION",
        /// Medical call
        Medical = 6 => "ALARM_MEDICAL",
        /// Duress code
        Duress = 7 => "ALARM_DURESS",
        /// Output started or stopped
        OutputEvent = 10 => "OUTPUT_EVENT",
    }
}

wire_enum! {
    /// Alarm event phase
    pub enum EventState ("STATE_") {
        /// Cleared
        Inactive = 0 => "STATE_INACTIVE",
        /// Raised
        Active = 1 => "STATE_ACTIVE",
        /// Test activation
        Test = 2 => "STATE_TEST",
        /// Output starting
        Starting = 3 => "STATE_STARTING",
        /// Output stopping
        Stopping = 4 => "STATE_STOPPING",
    }
}

wire_enum! {
    /// Alarm priority
    pub enum Priority ("PRIORITY_") {
        /// Low
        Low = 0 => "PRIORITY_LOW",
        /// Medium
        Medium = 1 => "PRIORITY_MEDIUM",
        /// High
        High = 2 => "PRIORITY_HIGH",
        /// Critical
        Critical = 3 => "PRIORITY_CRITICAL",
    }
}

wire_enum! {
    /// Controller state machine position
    pub enum DeviceState ("STATE_") {
        /// Booting
        Boot = 0 => "STATE_BOOT",
        /// Initialising peripherals
        Init = 1 => "STATE_INIT",
        /// Bringing up the network
        Connecting = 2 => "STATE_CONNECTING",
        /// Operating normally
        Normal = 3 => "STATE_NORMAL",
        /// Alarm in progress
        Alarm = 4 => "STATE_ALARM",
        /// Maintenance mode
        Maintenance = 5 => "STATE_MAINTENANCE",
        /// Recoverable error
        Error = 6 => "STATE_ERROR",
        /// Critical failure
        Critical = 7 => "STATE_CRITICAL",
    }
}

wire_enum! {
    /// Active uplink
    pub enum NetworkInterface ("NETWORK_") {
        /// Wi-Fi
        Wifi = 0 => "NETWORK_WIFI",
        /// Wired Ethernet
        Ethernet = 1 => "NETWORK_ETHERNET",
        /// No uplink
        None = 2 => "NETWORK_NONE",
    }
}

wire_enum! {
    /// System command action
    pub enum SystemAction ("SYS_") {
        /// Unset
        Unknown = 0 => "SYS_UNKNOWN",
        /// Reboot the controller
        Reboot = 1 => "SYS_REBOOT",
        /// Wipe configuration
        FactoryReset = 2 => "SYS_FACTORY_RESET",
        /// Publish a status message
        GetStatus = 3 => "SYS_GET_STATUS",
        /// Set the RTC
        SetTime = 4 => "SYS_SET_TIME",
        /// Reset event counters
        ClearCounters = 5 => "SYS_CLEAR_COUNTERS",
    }
}

wire_enum! {
    /// Configuration section
    pub enum ConfigType ("CFG_") {
        /// Unset
        Unknown = 0 => "CFG_UNKNOWN",
        /// Wi-Fi settings
        Wifi = 1 => "CFG_WIFI",
        /// Broker settings
        Mqtt = 2 => "CFG_MQTT",
        /// Device identity
        Device = 3 => "CFG_DEVICE",
        /// Location
        Location = 4 => "CFG_LOCATION",
        /// Time sync
        Ntp = 5 => "CFG_NTP",
        /// Bluetooth LE
        Ble = 6 => "CFG_BLE",
    }
}

wire_enum! {
    /// Output channel
    pub enum OutputType ("OUT_") {
        /// Unset
        Unknown = 0 => "OUT_UNKNOWN",
        /// Siren
        Siren = 1 => "OUT_SIREN",
        /// Beacon turret
        Turret = 2 => "OUT_TURRET",
        /// Relay 1
        Relay1 = 3 => "OUT_RELAY1",
        /// Relay 2
        Relay2 = 4 => "OUT_RELAY2",
        /// Cooling fan
        Fan = 5 => "OUT_FAN",
        /// Every output
        All = 6 => "OUT_ALL",
    }
}

wire_enum! {
    /// Output drive pattern
    pub enum PatternType ("PATTERN_") {
        /// No pattern
        None = 0 => "PATTERN_NONE",
        /// Steady on
        Constant = 1 => "PATTERN_CONSTANT",
        /// Single pulse
        Pulse = 2 => "PATTERN_PULSE",
        /// Slow blink
        BlinkSlow = 3 => "PATTERN_BLINK_SLOW",
        /// Fast blink
        BlinkFast = 4 => "PATTERN_BLINK_FAST",
        /// Two pulses
        DoublePulse = 5 => "PATTERN_DOUBLE_PULSE",
        /// Three pulses
        TriplePulse = 6 => "PATTERN_TRIPLE_PULSE",
        /// Morse SOS
        Sos = 7 => "PATTERN_SOS",
        /// Strobe
        Strobe = 8 => "PATTERN_STROBE",
        /// Force off
        Off = 9 => "PATTERN_OFF",
        /// PWM duty cycle, fan only
        Pwm = 10 => "PATTERN_PWM",
        /// Caller-defined timing
        Custom = 255 => "PATTERN_CUSTOM",
    }
}

wire_enum! {
    /// Diagnostic command action
    pub enum DiagAction ("DIAG_") {
        /// Unset
        Unknown = 0 => "DIAG_UNKNOWN",
        /// Run the self test
        SelfTest = 1 => "DIAG_SELF_TEST",
        /// Heap report
        MemoryInfo = 2 => "DIAG_MEMORY_INFO",
        /// Network report
        NetworkInfo = 3 => "DIAG_NETWORK_INFO",
        /// Sensor readings
        SensorRead = 4 => "DIAG_SENSOR_READ",
        /// Recent log lines
        LogDump = 5 => "DIAG_LOG_DUMP",
        /// Input/output snapshot
        InoutRead = 6 => "DIAG_INOUT_READ",
    }
}

wire_enum! {
    /// Firmware update action
    pub enum OtaAction ("OTA_") {
        /// Unset
        Unknown = 0 => "OTA_UNKNOWN",
        /// Ask the device to check for an update
        CheckUpdate = 1 => "OTA_CHECK_UPDATE",
        /// Download and flash an image
        StartUpdate = 2 => "OTA_START_UPDATE",
        /// Mark the running image good
        Validate = 3 => "OTA_VALIDATE",
        /// Boot the previous image
        Rollback = 4 => "OTA_ROLLBACK",
        /// Report update state
        GetStatus = 5 => "OTA_GET_STATUS",
    }
}

wire_enum! {
    /// Configuration section to read back
    pub enum ReadType ("READ_") {
        /// Unset
        Unknown = 0 => "READ_UNKNOWN",
        /// Wi-Fi settings
        Wifi = 1 => "READ_WIFI",
        /// Broker settings
        Mqtt = 2 => "READ_MQTT",
        /// Device identity
        Device = 3 => "READ_DEVICE",
        /// Location
        Location = 4 => "READ_LOCATION",
        /// Time sync
        Ntp = 5 => "READ_NTP",
        /// Bluetooth LE
        Ble = 6 => "READ_BLE",
        /// Every section
        All = 7 => "READ_ALL",
    }
}
