/// Validation errors for domain value objects and command input
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    // ObjectKey validation errors
    EmptyObjectKey,
    ObjectKeyTooLong {
        actual: usize,
        max: usize,
    },
    ObjectKeyStartsWithSlash,
    InvalidObjectKeyCharacter(char),

    // BucketName validation errors
    BucketNameLength {
        actual: usize,
        min: usize,
        max: usize,
    },
    BucketNameInvalidEdge,
    BucketNameInvalidCharacter(char),
    BucketNameConsecutiveHyphens,

    // Content descriptor errors
    EmptyFileName,
    NonPositiveFileSize(i64),
    EmptyContentType,

    // Session errors
    TtlOutOfRange {
        actual_seconds: i64,
        min_seconds: i64,
        max_seconds: i64,
    },
    InvalidPartNumber(u32),
    DuplicatePartNumber(u32),
    EmptyEtag,

    // Idempotency / download errors
    EmptyIdempotencyKey,
    IdempotencyKeyTooLong {
        actual: usize,
        max: usize,
    },
    InvalidIdempotencyKeyCharacter(char),
    InvalidUrl {
        field: String,
        value: String,
    },
    InvalidMaxRetries(u32),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyObjectKey => write!(f, "Object key cannot be empty"),
            ValidationError::ObjectKeyTooLong { actual, max } => {
                write!(f, "Object key too long: {} bytes (max: {})", actual, max)
            }
            ValidationError::ObjectKeyStartsWithSlash => {
                write!(f, "Object key cannot start with '/'")
            }
            ValidationError::InvalidObjectKeyCharacter(c) => {
                write!(f, "Invalid character in object key: {:?}", c)
            }

            ValidationError::BucketNameLength { actual, min, max } => {
                write!(
                    f,
                    "Bucket name must be {}-{} characters, got {}",
                    min, max, actual
                )
            }
            ValidationError::BucketNameInvalidEdge => {
                write!(
                    f,
                    "Bucket name must start and end with a lowercase letter or number"
                )
            }
            ValidationError::BucketNameInvalidCharacter(c) => {
                write!(f, "Invalid character in bucket name: '{}'", c)
            }
            ValidationError::BucketNameConsecutiveHyphens => {
                write!(f, "Bucket name cannot contain consecutive hyphens")
            }

            ValidationError::EmptyFileName => write!(f, "File name cannot be empty"),
            ValidationError::NonPositiveFileSize(size) => {
                write!(f, "File size must be positive, got {}", size)
            }
            ValidationError::EmptyContentType => write!(f, "Content type cannot be empty"),

            ValidationError::TtlOutOfRange {
                actual_seconds,
                min_seconds,
                max_seconds,
            } => {
                write!(
                    f,
                    "Session TTL of {}s is outside the allowed range [{}s, {}s]",
                    actual_seconds, min_seconds, max_seconds
                )
            }
            ValidationError::InvalidPartNumber(n) => {
                write!(f, "Part number must be between 1 and 10000, got {}", n)
            }
            ValidationError::DuplicatePartNumber(n) => {
                write!(f, "Part {} has already been recorded", n)
            }
            ValidationError::EmptyEtag => write!(f, "ETag cannot be empty"),

            ValidationError::EmptyIdempotencyKey => write!(f, "Idempotency key cannot be empty"),
            ValidationError::IdempotencyKeyTooLong { actual, max } => {
                write!(
                    f,
                    "Idempotency key too long: {} characters (max: {})",
                    actual, max
                )
            }
            ValidationError::InvalidIdempotencyKeyCharacter(c) => {
                write!(f, "Invalid character in idempotency key: {:?}", c)
            }
            ValidationError::InvalidUrl { field, value } => {
                write!(f, "Invalid URL for '{}': {}", field, value)
            }
            ValidationError::InvalidMaxRetries(n) => {
                write!(f, "maxRetries must be at least 1, got {}", n)
            }
        }
    }
}

impl std::error::Error for ValidationError {}
