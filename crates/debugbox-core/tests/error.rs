//! Tests for error handling

use debugbox_core::error::{DebugError, Result};
use debugbox_core::LinearAddress;
use debugbox_protocol::{RemoteErrorKind, TransportError};

#[test]
fn test_resolution_error_names_selector()
{
    let error = DebugError::Resolution { selector: 0x2b };
    assert!(error.to_string().contains("0x002b"));
    assert_eq!(error.to_remote().kind, RemoteErrorKind::Resolution);
}

#[test]
fn test_unknown_register_maps_to_remote_kind()
{
    let error = DebugError::UnknownRegister("xmm0".to_string());
    let remote = error.to_remote();
    assert_eq!(remote.kind, RemoteErrorKind::UnknownRegister);
    assert!(remote.message.contains("xmm0"));
}

#[test]
fn test_other_errors_are_reported_as_failed()
{
    let errors = [
        DebugError::MemoryUnavailable(LinearAddress::new(0x1_0000)),
        DebugError::ProtocolMalformed("missing id".to_string()),
        DebugError::ScratchAllocation { paragraphs: 0x20 },
    ];
    for error in errors {
        assert_eq!(error.to_remote().kind, RemoteErrorKind::Failed);
    }
}

#[test]
fn test_transport_error_conversion()
{
    let error: DebugError = TransportError::Closed.into();
    assert!(matches!(error, DebugError::Transport(TransportError::Closed)));
    assert!(error.to_string().contains("Peer disconnected"));
}

#[test]
fn test_result_type_alias()
{
    fn ok() -> Result<u32>
    {
        Ok(42)
    }

    fn fail() -> Result<u32>
    {
        Err(DebugError::UnknownRegister("zz".to_string()))
    }

    assert_eq!(ok().unwrap(), 42);
    assert!(fail().is_err());
}
