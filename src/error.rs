use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Write;
use std::panic::Location;
use std::result::Result as StdResult;

/// Numeric identifiers for everything that can go wrong while working with E57 files.
///
/// The discriminant values are stable and part of the public error contract,
/// which is why they are spelled out explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A compressed vector binary section header was bad.
    BadCvHeader = 1,
    /// A compressed vector binary packet was bad.
    BadCvPacket = 2,
    /// A numerical index identifying a child was out of bounds.
    ChildIndexOutOfBounds = 3,
    /// Attempted to set an existing child element to a new value.
    SetTwice = 4,
    /// Attempted to append a child that would make a homogeneous vector heterogeneous.
    HomogeneousViolation = 5,
    /// A value could not be represented in the requested type.
    ValueNotRepresentable = 6,
    /// After scaling the result could not be represented in the requested type.
    ScaledValueNotRepresentable = 7,
    /// A 64 bit IEEE float was too large to store in a 32 bit IEEE float.
    Real64TooLarge = 8,
    /// Expecting a numeric representation in the user's buffer, found a string.
    ExpectingNumeric = 9,
    /// Expecting a string representation in the user's buffer, found a numeric.
    ExpectingUstring = 10,
    /// An unrecoverable inconsistent internal state was detected.
    Internal = 11,
    /// An E57 primitive was not encoded correctly in the XML section.
    BadXmlFormat = 12,
    /// The XML section is not well formed.
    XmlParser = 13,
    /// Bad API function argument provided by the caller.
    BadApiArgument = 14,
    /// Cannot modify a file opened for reading.
    FileReadOnly = 15,
    /// Page checksum mismatch, the file is corrupted.
    BadChecksum = 16,
    /// Opening the underlying file failed.
    OpenFailed = 17,
    /// Closing the underlying file failed.
    CloseFailed = 18,
    /// Reading from the underlying file failed.
    ReadFailed = 19,
    /// Writing to the underlying file failed.
    WriteFailed = 20,
    /// Seeking inside the underlying file failed.
    SeekFailed = 21,
    /// An E57 element path was well formed but is not defined.
    PathUndefined = 22,
    /// Bad source or destination buffer.
    BadBuffer = 23,
    /// No buffer was specified for an element of a compressed vector.
    NoBufferForElement = 24,
    /// Source or destination buffers do not all have the same capacity.
    BufferSizeMismatch = 25,
    /// Duplicate path name among source or destination buffers.
    BufferDuplicatePathname = 26,
    /// The file signature is not "ASTM-E57".
    BadFileSignature = 27,
    /// Incompatible file version.
    UnknownFileVersion = 28,
    /// The length in the file header does not match the actual file.
    BadFileLength = 29,
    /// The XML parser failed to initialize.
    XmlParserInit = 30,
    /// The namespace prefix is already defined.
    DuplicateNamespacePrefix = 31,
    /// The namespace URI is already defined.
    DuplicateNamespaceUri = 32,
    /// Bad prototype in a compressed vector.
    BadPrototype = 33,
    /// Bad codecs in a compressed vector.
    BadCodecs = 34,
    /// Element value out of min/max bounds.
    ValueOutOfBounds = 35,
    /// Conversion required to transfer an element value, but not requested.
    ConversionRequired = 36,
    /// An E57 path name is not well formed.
    BadPathName = 37,
    /// Functionality not implemented.
    NotImplemented = 38,
    /// Bad downcast from a generic node to a specific node type.
    BadNodeDowncast = 39,
    /// The compressed vector writer is no longer open.
    WriterNotOpen = 40,
    /// The compressed vector reader is no longer open.
    ReaderNotOpen = 41,
    /// The node is not attached to the tree of a file.
    NodeUnattached = 42,
    /// The node already has a parent.
    AlreadyHasParent = 43,
    /// The nodes belong to different destination files.
    DifferentDestImageFile = 44,
    /// The destination file is no longer open.
    ImageFileNotOpen = 45,
    /// Buffers are not compatible with the ones given previously.
    BuffersNotCompatible = 46,
    /// Too many open compressed vector writers for one file.
    TooManyWriters = 47,
    /// Too many open compressed vector readers for one file.
    TooManyReaders = 48,
    /// Bad configuration value.
    BadConfiguration = 49,
    /// An invariant check on an entity failed.
    InvarianceViolation = 50,
}

impl ErrorKind {
    /// Returns the stable numeric code of the error kind.
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Maps the error kind to a short human-readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadCvHeader => "bad compressed vector section header",
            ErrorKind::BadCvPacket => "bad compressed vector packet",
            ErrorKind::ChildIndexOutOfBounds => "child index out of bounds",
            ErrorKind::SetTwice => "element set twice",
            ErrorKind::HomogeneousViolation => "heterogeneous child in homogeneous vector",
            ErrorKind::ValueNotRepresentable => "value not representable",
            ErrorKind::ScaledValueNotRepresentable => "scaled value not representable",
            ErrorKind::Real64TooLarge => "double too large for single precision",
            ErrorKind::ExpectingNumeric => "expecting numeric buffer",
            ErrorKind::ExpectingUstring => "expecting string buffer",
            ErrorKind::Internal => "internal error",
            ErrorKind::BadXmlFormat => "bad XML encoding of E57 primitive",
            ErrorKind::XmlParser => "XML not well formed",
            ErrorKind::BadApiArgument => "bad API argument",
            ErrorKind::FileReadOnly => "file is read only",
            ErrorKind::BadChecksum => "page checksum mismatch",
            ErrorKind::OpenFailed => "open failed",
            ErrorKind::CloseFailed => "close failed",
            ErrorKind::ReadFailed => "read failed",
            ErrorKind::WriteFailed => "write failed",
            ErrorKind::SeekFailed => "seek failed",
            ErrorKind::PathUndefined => "path not defined",
            ErrorKind::BadBuffer => "bad buffer",
            ErrorKind::NoBufferForElement => "no buffer for prototype element",
            ErrorKind::BufferSizeMismatch => "buffer size mismatch",
            ErrorKind::BufferDuplicatePathname => "duplicate buffer path name",
            ErrorKind::BadFileSignature => "bad file signature",
            ErrorKind::UnknownFileVersion => "unknown file version",
            ErrorKind::BadFileLength => "bad file length",
            ErrorKind::XmlParserInit => "XML parser initialization failed",
            ErrorKind::DuplicateNamespacePrefix => "namespace prefix already defined",
            ErrorKind::DuplicateNamespaceUri => "namespace URI already defined",
            ErrorKind::BadPrototype => "bad compressed vector prototype",
            ErrorKind::BadCodecs => "bad compressed vector codecs",
            ErrorKind::ValueOutOfBounds => "value out of bounds",
            ErrorKind::ConversionRequired => "conversion required but not requested",
            ErrorKind::BadPathName => "path name not well formed",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::BadNodeDowncast => "bad node downcast",
            ErrorKind::WriterNotOpen => "writer is not open",
            ErrorKind::ReaderNotOpen => "reader is not open",
            ErrorKind::NodeUnattached => "node is not attached",
            ErrorKind::AlreadyHasParent => "node already has a parent",
            ErrorKind::DifferentDestImageFile => "nodes belong to different files",
            ErrorKind::ImageFileNotOpen => "file is no longer open",
            ErrorKind::BuffersNotCompatible => "buffers not compatible with previous ones",
            ErrorKind::TooManyWriters => "too many open writers",
            ErrorKind::TooManyReaders => "too many open readers",
            ErrorKind::BadConfiguration => "bad configuration",
            ErrorKind::InvarianceViolation => "invariant violation",
        }
    }
}

/// Failure type used by all fallible operations of this crate.
///
/// Carries a numeric [`ErrorKind`], a free-form context message,
/// the source location where the error was raised and an optional
/// wrapped cause from a lower layer.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: String,
    location: &'static Location<'static>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

pub type Result<T> = StdResult<T, Error>;

impl Error {
    /// Creates a new error with the supplied kind and context message.
    #[track_caller]
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
            location: Location::caller(),
            source: None,
        }
    }

    #[track_caller]
    pub(crate) fn with_source(
        kind: ErrorKind,
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            context: context.into(),
            location: Location::caller(),
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand producing an `Err` result, usable as `Error::failed(kind, "...")?`.
    #[track_caller]
    pub(crate) fn failed<T>(kind: ErrorKind, context: impl Into<String>) -> Result<T> {
        Err(Self::new(kind, context))
    }

    #[track_caller]
    pub(crate) fn internal<T>(context: impl Into<String>) -> Result<T> {
        Err(Self::new(ErrorKind::Internal, context))
    }

    #[track_caller]
    pub(crate) fn not_implemented<T>(context: impl Into<String>) -> Result<T> {
        Err(Self::new(ErrorKind::NotImplemented, context))
    }

    /// Returns the numeric kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the context message describing what went wrong.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Returns the source location where the error was raised.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Writes a full diagnostic report with kind, context and source site.
    pub fn report(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "E57 error {} ({}) at {}:{}: {}",
            self.kind.code(),
            self.kind.as_str(),
            self.location.file(),
            self.location.line(),
            self.context
        )?;
        let mut source = self.source();
        while let Some(cause) = source {
            writeln!(out, "  caused by: {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}: {}", self.kind.as_str(), self.context)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

/// Helper trait to convert other error types and options into crate errors
/// with a kind and some context.
pub trait Converter<T, E> {
    fn kind_err(self, kind: ErrorKind, context: impl Into<String>) -> Result<T>;
    fn read_err(self, context: impl Into<String>) -> Result<T>;
    fn write_err(self, context: impl Into<String>) -> Result<T>;
    fn internal_err(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: StdError + Send + Sync + 'static> Converter<T, E> for StdResult<T, E> {
    #[track_caller]
    fn kind_err(self, kind: ErrorKind, context: impl Into<String>) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(Error::with_source(kind, context, err)),
        }
    }

    #[track_caller]
    fn read_err(self, context: impl Into<String>) -> Result<T> {
        self.kind_err(ErrorKind::ReadFailed, context)
    }

    #[track_caller]
    fn write_err(self, context: impl Into<String>) -> Result<T> {
        self.kind_err(ErrorKind::WriteFailed, context)
    }

    #[track_caller]
    fn internal_err(self, context: impl Into<String>) -> Result<T> {
        self.kind_err(ErrorKind::Internal, context)
    }
}

impl<T> Converter<T, ()> for Option<T> {
    #[track_caller]
    fn kind_err(self, kind: ErrorKind, context: impl Into<String>) -> Result<T> {
        match self {
            Some(value) => Ok(value),
            None => Err(Error::new(kind, context)),
        }
    }

    #[track_caller]
    fn read_err(self, context: impl Into<String>) -> Result<T> {
        self.kind_err(ErrorKind::ReadFailed, context)
    }

    #[track_caller]
    fn write_err(self, context: impl Into<String>) -> Result<T> {
        self.kind_err(ErrorKind::WriteFailed, context)
    }

    #[track_caller]
    fn internal_err(self, context: impl Into<String>) -> Result<T> {
        self.kind_err(ErrorKind::Internal, context)
    }
}

pub const WRONG_OFFSET: &str = "Tried to read/write data with wrong offset";
