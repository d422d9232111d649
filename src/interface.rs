use std::ffi::CStr;
use std::net::Ipv4Addr;

use crate::error::InterfaceError;

/// Returns the first IPv4 address assigned to the interface `name`.
pub fn interface_ipv4(name: &str) -> Result<Ipv4Addr, InterfaceError> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success `addrs` points to a list owned by libc, released below.
    if unsafe { libc::getifaddrs(&mut addrs) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let mut known = false;
    let mut found = None;
    let mut cursor = addrs;
    while !cursor.is_null() {
        // SAFETY: `cursor` is a non-null node of the list returned by getifaddrs.
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_name.is_null() {
            continue;
        }
        // SAFETY: `ifa_name` is a NUL-terminated string owned by the list.
        let ifname = unsafe { CStr::from_ptr(entry.ifa_name) };
        if ifname.to_bytes() != name.as_bytes() {
            continue;
        }
        known = true;

        if entry.ifa_addr.is_null() {
            continue;
        }
        // SAFETY: `ifa_addr` is non-null; the family tells us the concrete layout.
        let family = i32::from(unsafe { (*entry.ifa_addr).sa_family });
        if family == libc::AF_INET {
            // SAFETY: AF_INET entries carry a `sockaddr_in`.
            #[allow(clippy::cast_ptr_alignment)]
            let sin = unsafe { &*entry.ifa_addr.cast::<libc::sockaddr_in>() };
            found = Some(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
            break;
        }
    }
    // SAFETY: `addrs` came from a successful getifaddrs and is freed once.
    unsafe { libc::freeifaddrs(addrs) };

    match found {
        Some(ip) => Ok(ip),
        None if known => Err(InterfaceError::NoIpv4Address(name.to_string())),
        None => Err(InterfaceError::UnknownInterface(name.to_string())),
    }
}
