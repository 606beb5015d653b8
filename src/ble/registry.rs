//! GATT attribute table for the provisioning service.
//!
//! The service exposes two characteristics:
//!
//! ```text
//! Service d43e0800-d5a5-d3e5-b13e-3922431410be
//! ├── Identity (Read, Write, Notify)   d43e0811-...  + client config
//! └── Command  (Read, Write, Notify)   d43e0822-...  + client config
//! ```
//!
//! [`declare_table`] describes the seven attributes in creation order. Once
//! the BLE stack reports the handles it assigned, [`HandleTable::from_created`]
//! fixes the slot-to-handle mapping for the lifetime of the service.

use std::fmt;

/// Number of attributes in the provisioning service.
pub const SLOT_COUNT: usize = 7;

/// Primary service declaration.
pub const UUID_PRIMARY_SERVICE: u16 = 0x2800;
/// Characteristic declaration.
pub const UUID_CHARACTERISTIC: u16 = 0x2803;
/// Client characteristic configuration descriptor.
pub const UUID_CLIENT_CONFIG: u16 = 0x2902;

/// Provisioning service UUID.
pub const SERVICE_UUID: Uuid128 = Uuid128::from_u128(0xd43e0800_d5a5_d3e5_b13e_3922431410be);
/// Identity characteristic (channel A).
pub const IDENTITY_CHAR_UUID: Uuid128 = Uuid128::from_u128(0xd43e0811_d5a5_d3e5_b13e_3922431410be);
/// Command characteristic (channel B).
pub const COMMAND_CHAR_UUID: Uuid128 = Uuid128::from_u128(0xd43e0822_d5a5_d3e5_b13e_3922431410be);
/// UUID placed in the advertisement.
pub const ADVERTISED_UUID: Uuid128 = Uuid128::from_u128(0x000000ff_0000_1000_8000_00805f9b34fb);

/// 128-bit UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid128(u128);

impl Uuid128 {
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xffff_ffff_ffff
        )
    }
}

/// Attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Uuid16(u16),
    Uuid128(Uuid128),
}

/// Logical channel of the provisioning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Channel A: shared-secret token and identity query.
    Identity,
    /// Channel B: JSON commands and all replies.
    Command,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Identity, Channel::Command];

    /// Index into per-channel arrays.
    pub const fn index(self) -> usize {
        match self {
            Channel::Identity => 0,
            Channel::Command => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Identity => write!(f, "identity"),
            Channel::Command => write!(f, "command"),
        }
    }
}

/// Position of an attribute in the service, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Service,
    IdentityDecl,
    IdentityValue,
    IdentityConfig,
    CommandDecl,
    CommandValue,
    CommandConfig,
}

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [
        Slot::Service,
        Slot::IdentityDecl,
        Slot::IdentityValue,
        Slot::IdentityConfig,
        Slot::CommandDecl,
        Slot::CommandValue,
        Slot::CommandConfig,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Characteristic property bits as carried in the declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Properties(u8);

impl Properties {
    pub const READ: Properties = Properties(0x02);
    pub const WRITE: Properties = Properties(0x08);
    pub const NOTIFY: Properties = Properties(0x10);
    pub const INDICATE: Properties = Properties(0x20);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Properties) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Properties {
    type Output = Properties;

    fn bitor(self, rhs: Properties) -> Properties {
        Properties(self.0 | rhs.0)
    }
}

/// Attribute access permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    /// Require an encrypted link for access.
    pub encrypted: bool,
}

impl Permissions {
    const READ_ONLY: Permissions = Permissions {
        read: true,
        write: false,
        encrypted: false,
    };

    const READ_WRITE: Permissions = Permissions {
        read: true,
        write: true,
        encrypted: false,
    };
}

/// One attribute to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub slot: Slot,
    pub attr_type: AttrType,
    pub permissions: Permissions,
    /// Declared properties, for characteristic declarations.
    pub properties: Option<Properties>,
    /// Maximum value length.
    pub max_len: usize,
}

/// Attribute layout of the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub service: Uuid128,
    pub attributes: Vec<AttributeSpec>,
}

/// Describe the provisioning service.
///
/// Value attributes do not require encryption at the attribute layer; the
/// link is encrypted on connect instead.
pub fn declare_table(max_value_len: usize) -> TableSpec {
    let char_props = Properties::READ | Properties::WRITE | Properties::NOTIFY;
    let declaration = |slot| AttributeSpec {
        slot,
        attr_type: AttrType::Uuid16(UUID_CHARACTERISTIC),
        permissions: Permissions::READ_ONLY,
        properties: Some(char_props),
        max_len: 0,
    };
    let value = |slot, uuid| AttributeSpec {
        slot,
        attr_type: AttrType::Uuid128(uuid),
        permissions: Permissions::READ_WRITE,
        properties: None,
        max_len: max_value_len,
    };
    let config = |slot| AttributeSpec {
        slot,
        attr_type: AttrType::Uuid16(UUID_CLIENT_CONFIG),
        permissions: Permissions::READ_WRITE,
        properties: None,
        max_len: 2,
    };

    TableSpec {
        service: SERVICE_UUID,
        attributes: vec![
            AttributeSpec {
                slot: Slot::Service,
                attr_type: AttrType::Uuid16(UUID_PRIMARY_SERVICE),
                permissions: Permissions::READ_ONLY,
                properties: None,
                max_len: 16,
            },
            declaration(Slot::IdentityDecl),
            value(Slot::IdentityValue, IDENTITY_CHAR_UUID),
            config(Slot::IdentityConfig),
            declaration(Slot::CommandDecl),
            value(Slot::CommandValue, COMMAND_CHAR_UUID),
            config(Slot::CommandConfig),
        ],
    }
}

/// What a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Characteristic value of a channel.
    Value(Channel),
    /// Client config descriptor of a channel.
    Config(Channel),
    /// Any other attribute, or a handle outside the service.
    Other,
}

/// Handles assigned by the BLE stack, indexed by [`Slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleTable([u16; SLOT_COUNT]);

impl HandleTable {
    /// Build the table from the handles reported on table creation.
    ///
    /// A count mismatch means the service definition and the stack disagree;
    /// it is fatal and the service must not be started.
    pub fn from_created(handles: &[u16]) -> Result<Self, RegistryError> {
        if handles.len() != SLOT_COUNT {
            return Err(RegistryError::CountMismatch {
                expected: SLOT_COUNT,
                actual: handles.len(),
            });
        }
        let mut table = [0u16; SLOT_COUNT];
        for (i, &handle) in handles.iter().enumerate() {
            if handle == 0 {
                return Err(RegistryError::InvalidHandle { slot: Slot::ALL[i] });
            }
            table[i] = handle;
        }
        Ok(Self(table))
    }

    /// Handles of a service whose attributes were allocated consecutively,
    /// starting with the service declaration at `service_handle`.
    pub fn consecutive(service_handle: u16) -> Result<Self, RegistryError> {
        let handles: Vec<u16> = (0..SLOT_COUNT as u16)
            .map(|i| service_handle.wrapping_add(i))
            .collect();
        if handles.windows(2).any(|w| w[1] <= w[0]) {
            return Err(RegistryError::InvalidHandle { slot: Slot::CommandConfig });
        }
        Self::from_created(&handles)
    }

    pub fn handle(&self, slot: Slot) -> u16 {
        self.0[slot.index()]
    }

    pub fn value_handle(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Identity => self.handle(Slot::IdentityValue),
            Channel::Command => self.handle(Slot::CommandValue),
        }
    }

    pub fn config_handle(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Identity => self.handle(Slot::IdentityConfig),
            Channel::Command => self.handle(Slot::CommandConfig),
        }
    }

    /// Identify which channel attribute `handle` belongs to.
    pub fn classify(&self, handle: u16) -> Target {
        for channel in Channel::ALL {
            if handle == self.value_handle(channel) {
                return Target::Value(channel);
            }
            if handle == self.config_handle(channel) {
                return Target::Config(channel);
            }
        }
        Target::Other
    }
}

/// Attribute table errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The stack created a different number of attributes than declared.
    CountMismatch { expected: usize, actual: usize },
    /// The stack reported handle 0 (or a non-increasing handle) for a slot.
    InvalidHandle { slot: Slot },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch { expected, actual } => write!(
                f,
                "attribute table mismatch: created {} handles, expected {}",
                actual, expected
            ),
            Self::InvalidHandle { slot } => write!(f, "invalid handle for {:?}", slot),
        }
    }
}

impl std::error::Error for RegistryError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HandleTable {
        HandleTable::from_created(&[40, 41, 42, 43, 44, 45, 46]).unwrap()
    }

    #[test]
    fn test_uuid_display() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "d43e0800-d5a5-d3e5-b13e-3922431410be"
        );
        assert_eq!(
            ADVERTISED_UUID.to_string(),
            "000000ff-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_declared_layout() {
        let spec = declare_table(1024);
        assert_eq!(spec.attributes.len(), SLOT_COUNT);
        for (attr, slot) in spec.attributes.iter().zip(Slot::ALL) {
            assert_eq!(attr.slot, slot);
        }

        let value = &spec.attributes[2];
        assert_eq!(value.attr_type, AttrType::Uuid128(IDENTITY_CHAR_UUID));
        assert!(value.permissions.read && value.permissions.write);
        assert!(!value.permissions.encrypted);
        assert_eq!(value.max_len, 1024);

        let decl = &spec.attributes[4];
        let props = decl.properties.unwrap();
        assert!(props.contains(Properties::WRITE | Properties::NOTIFY));
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let result = HandleTable::from_created(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(
            result,
            Err(RegistryError::CountMismatch {
                expected: 7,
                actual: 6
            })
        );
    }

    #[test]
    fn test_zero_handle_is_rejected() {
        let result = HandleTable::from_created(&[1, 2, 0, 4, 5, 6, 7]);
        assert!(matches!(
            result,
            Err(RegistryError::InvalidHandle {
                slot: Slot::IdentityValue
            })
        ));
    }

    #[test]
    fn test_classify() {
        let table = table();
        assert_eq!(table.classify(42), Target::Value(Channel::Identity));
        assert_eq!(table.classify(43), Target::Config(Channel::Identity));
        assert_eq!(table.classify(45), Target::Value(Channel::Command));
        assert_eq!(table.classify(46), Target::Config(Channel::Command));
        assert_eq!(table.classify(40), Target::Other);
        assert_eq!(table.classify(99), Target::Other);
    }

    #[test]
    fn test_consecutive_handles() {
        let table = HandleTable::consecutive(40).unwrap();
        assert_eq!(table, self::table());
        assert!(HandleTable::consecutive(u16::MAX - 2).is_err());
    }
}
