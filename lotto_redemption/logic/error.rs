#[derive(Debug, Eq, PartialEq, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum RedemptionError {
    Validation(ValidationError),
    Decode(DecodeError),
    /// A ticket with the same id but a different content is already registered
    DuplicateTicket,
    State(StateError),
    PermissionDenied,
    SessionExpired,
    Storage(StorageError),
    /// The payload does not fit in a QR symbol
    SymbolTooLarge,
    AddOverFlow,
}

/// malformed draw or ticket input
#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum ValidationError {
    IncorrectConfig,
    IncorrectNbNumbers,
    NumberOutOfRange,
    DuplicateNumber,
    IncorrectSchedule,
    IncorrectTiers,
    IncorrectPrizeTable,
    UnknownDraw,
    UnknownTicket,
    InvalidSignature,
    IssuedOutsideDraw,
    MissingReason,
}

/// corrupt or unreadable QR payload
#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum DecodeError {
    NoSymbolFound,
    UnreadableSymbol,
    InvalidHex,
    MissingField,
    TruncatedField,
    MalformedField,
    InvalidKeyLength,
}

/// illegal transition
#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum StateError {
    DrawStillOpen,
    DrawNotSettled,
    DifferentResults,
    AlreadyVoided,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum StorageError {
    /// the store cannot be reached, the call can be retried
    Unavailable,
    /// the version given to a compare and swap is not the current one
    VersionConflict,
    /// the stored value cannot be decoded
    Corrupted,
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable | StorageError::VersionConflict)
    }
}

impl RedemptionError {
    /// true if the same call can be replayed later with the same idempotency key
    pub fn is_transient(&self) -> bool {
        match self {
            RedemptionError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// convertor from ValidationError to RedemptionError
impl From<ValidationError> for RedemptionError {
    fn from(error: ValidationError) -> Self {
        RedemptionError::Validation(error)
    }
}

/// convertor from DecodeError to RedemptionError
impl From<DecodeError> for RedemptionError {
    fn from(error: DecodeError) -> Self {
        RedemptionError::Decode(error)
    }
}

/// convertor from StateError to RedemptionError
impl From<StateError> for RedemptionError {
    fn from(error: StateError) -> Self {
        RedemptionError::State(error)
    }
}

/// convertor from StorageError to RedemptionError
impl From<StorageError> for RedemptionError {
    fn from(error: StorageError) -> Self {
        RedemptionError::Storage(error)
    }
}

impl From<scale::Error> for StorageError {
    fn from(error: scale::Error) -> Self {
        log::error!("stored value cannot be decoded: {:?}", error);
        StorageError::Corrupted
    }
}
