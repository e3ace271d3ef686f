//! Control-channel client
//!
//! One synchronous request/response exchange per call. Peer failures are
//! folded into two buckets: an invalid-parameter status stays
//! [`ConsoleError::InvalidParameter`], anything else becomes
//! [`ConsoleError::InvalidHandle`].

use bytemuck::Pod;
use tracing::debug;

use crate::core::kernel::{Kernel, NtStatus};
use crate::core::types::Handle;
use crate::error::{ConsoleError, Result};

/// Map a peer status onto the caller-facing error surface
pub fn map_status(status: NtStatus) -> ConsoleError {
    match status {
        NtStatus::INVALID_PARAMETER => ConsoleError::InvalidParameter,
        _ => ConsoleError::InvalidHandle,
    }
}

/// Perform one control exchange; returns the number of output bytes produced
pub fn console_ioctl(
    kernel: &dyn Kernel,
    handle: Handle,
    code: u32,
    input: &[u8],
    output: &mut [u8],
) -> Result<usize> {
    kernel.control(handle, code, input, output).map_err(|status| {
        debug!("ioctl {:#x} on {} failed: {}", code, handle, status);
        map_status(status)
    })
}

/// Exchange with a typed request and no response
pub fn ioctl_in<T: Pod>(kernel: &dyn Kernel, handle: Handle, code: u32, request: &T) -> Result<()> {
    console_ioctl(kernel, handle, code, bytemuck::bytes_of(request), &mut [])?;
    Ok(())
}

/// Exchange with no request and a typed response
pub fn ioctl_out<T: Pod>(kernel: &dyn Kernel, handle: Handle, code: u32) -> Result<T> {
    let mut response = T::zeroed();
    console_ioctl(kernel, handle, code, &[], bytemuck::bytes_of_mut(&mut response))?;
    Ok(response)
}

/// Exchange with a typed request and a typed response
pub fn ioctl_in_out<I: Pod, O: Pod>(kernel: &dyn Kernel, handle: Handle, code: u32, request: &I) -> Result<O> {
    let mut response = O::zeroed();
    console_ioctl(
        kernel,
        handle,
        code,
        bytemuck::bytes_of(request),
        bytemuck::bytes_of_mut(&mut response),
    )?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::host::LoopbackHost;
    use crate::core::protocol::{InputInfo, IOCTL_CONDRV_GET_INPUT_INFO, IOCTL_CONDRV_SET_MODE};

    #[test]
    fn test_two_bucket_mapping() {
        assert_eq!(map_status(NtStatus::INVALID_PARAMETER), ConsoleError::InvalidParameter);
        assert_eq!(map_status(NtStatus::ACCESS_DENIED), ConsoleError::InvalidHandle);
        assert_eq!(map_status(NtStatus::OBJECT_NAME_NOT_FOUND), ConsoleError::InvalidHandle);
    }

    #[test]
    fn test_null_handle_is_invalid_handle() {
        let host = LoopbackHost::new();
        let result = ioctl_out::<InputInfo>(&host, Handle::NULL, IOCTL_CONDRV_GET_INPUT_INFO);
        assert_eq!(result, Err(ConsoleError::InvalidHandle));
    }

    #[test]
    fn test_malformed_request_is_invalid_parameter() {
        let host = LoopbackHost::new();
        let (_, input, _) = host.create_client_session(80, 25);
        // SET_MODE wants a u32, not a single byte
        let result = console_ioctl(&host, input, IOCTL_CONDRV_SET_MODE, &[1u8], &mut []);
        assert_eq!(result, Err(ConsoleError::InvalidParameter));
    }
}
