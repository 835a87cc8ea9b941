//! C ABI for linking mine-core as a static library from C/C++ hosts.
//! Boolean-style calls return 1 on success and 0 on failure; the failure text
//! and OS code stay readable through `mine_errstr` / `mine_errcode` until the
//! next failing call.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;

use crate::connection::{Connection, ConnectionConfig};
use crate::error::Error;
use crate::inbound::Delivery;
use crate::protocol::ByteOrder;
use crate::tls::TlsVerify;

/// `mine_event_recv` result when the previous chunk completed the payload.
pub const MINE_END_OF_PAYLOAD: c_int = -2;

/// `mine_set_byte_order` values for the payload length in data frames.
pub const MINE_BYTE_ORDER_NATIVE: c_int = 0;
pub const MINE_BYTE_ORDER_LITTLE: c_int = 1;
pub const MINE_BYTE_ORDER_BIG: c_int = 2;

struct Handle {
    conn: Connection,
    errstr: Option<CString>,
    errcode: c_int,
    event: Option<CString>,
}

impl Handle {
    fn fail(&mut self, e: &Error) {
        self.errcode = e.code().unwrap_or(0);
        self.errstr = CString::new(e.to_string()).ok();
    }

    /// Apply `edit` to a copy of the settings and install it (disconnected only).
    fn reconfigure(&mut self, edit: impl FnOnce(&mut ConnectionConfig)) -> c_int {
        let mut config = self.conn.config().clone();
        edit(&mut config);
        let result = self.conn.set_config(config);
        self.finish(result)
    }

    fn finish(&mut self, result: Result<(), Error>) -> c_int {
        match result {
            Ok(()) => 1,
            Err(e) => {
                self.fail(&e);
                0
            }
        }
    }
}

/// Borrow a nullable C string as UTF-8.
///
/// # Safety
/// `p` must be null or point at a NUL-terminated string that outlives `'a`.
unsafe fn opt_str<'a>(p: *const c_char) -> Result<Option<&'a str>, Error> {
    if p.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(p)
        .to_str()
        .map(Some)
        .map_err(|_| Error::system("argument is not valid UTF-8"))
}

unsafe fn req_str<'a>(p: *const c_char) -> Result<&'a str, Error> {
    opt_str(p)?.ok_or_else(|| Error::system("required argument is null"))
}

unsafe fn handle<'a>(h: *mut c_void) -> Option<&'a mut Handle> {
    (h as *mut Handle).as_mut()
}

/// Create a disconnected connection. Returns an opaque handle.
#[no_mangle]
pub extern "C" fn mine_new() -> *mut c_void {
    let h = Handle {
        conn: Connection::new(),
        errstr: None,
        errcode: 0,
        event: None,
    };
    Box::into_raw(Box::new(h)) as *mut c_void
}

/// Disconnect (if needed) and free the handle. No-op if h is null.
#[no_mangle]
pub extern "C" fn mine_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut Handle) };
}

/// Skip (non-zero) or enforce (0) broker certificate verification on the
/// next connect. Enforced by default. Fails while connected.
#[no_mangle]
pub extern "C" fn mine_set_tls_insecure(h: *mut c_void, insecure: c_int) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    let verify = if insecure != 0 {
        TlsVerify::Insecure
    } else {
        TlsVerify::Webpki
    };
    h.reconfigure(|c| c.tls_verify = verify)
}

/// Name checked against the broker certificate; null restores the connect host.
/// Fails while connected.
#[no_mangle]
pub extern "C" fn mine_set_server_name(h: *mut c_void, name: *const c_char) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    match unsafe { opt_str(name) } {
        Ok(name) => {
            let name = name.map(str::to_string);
            h.reconfigure(|c| c.tls_server_name = name)
        }
        Err(e) => h.finish(Err(e)),
    }
}

/// One of the `MINE_BYTE_ORDER_*` values. Fails while connected or on an unknown value.
#[no_mangle]
pub extern "C" fn mine_set_byte_order(h: *mut c_void, order: c_int) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    let order = match order {
        MINE_BYTE_ORDER_NATIVE => ByteOrder::Native,
        MINE_BYTE_ORDER_LITTLE => ByteOrder::Little,
        MINE_BYTE_ORDER_BIG => ByteOrder::Big,
        other => return h.finish(Err(Error::system(format!("Unknown byte order {other}")))),
    };
    h.reconfigure(|c| c.byte_order = order)
}

/// Connect to host:port and run the selector handshake.
/// 1 on success, 0 on failure, -1 if h is null.
#[no_mangle]
pub extern "C" fn mine_connect(h: *mut c_void, host: *const c_char, port: u16) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    let result = unsafe { req_str(host) }.and_then(|host| h.conn.connect(host, port));
    h.finish(result)
}

/// Close the session. 1 on success (or when not connected), 0 on close failure.
#[no_mangle]
pub extern "C" fn mine_disconnect(h: *mut c_void) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    let result = h.conn.disconnect();
    h.finish(result)
}

/// 1 if the session runs over TLS, 0 otherwise.
#[no_mangle]
pub extern "C" fn mine_is_tls(h: *mut c_void) -> c_int {
    match unsafe { handle(h) } {
        Some(h) => c_int::from(h.conn.is_tls()),
        None => -1,
    }
}

/// Authenticate. Either credential may be null (sent as empty).
#[no_mangle]
pub extern "C" fn mine_login(
    h: *mut c_void,
    login: *const c_char,
    password: *const c_char,
) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    let result = unsafe { opt_str(login).and_then(|l| Ok((l, opt_str(password)?))) }
        .and_then(|(l, p)| h.conn.login(l, p));
    h.finish(result)
}

/// Register interest in `event` from source address `ip` (dotted quad).
#[no_mangle]
pub extern "C" fn mine_event_reg(h: *mut c_void, event: *const c_char, ip: *const c_char) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    let result = unsafe { req_str(event).and_then(|e| Ok((e, req_str(ip)?))) }
        .and_then(|(e, ip)| h.conn.register_event(e, ip));
    h.finish(result)
}

/// Publish `chunklen` bytes of a `datalen`-byte payload for `event`.
#[no_mangle]
pub extern "C" fn mine_event_send(
    h: *mut c_void,
    event: *const c_char,
    datalen: i64,
    chunklen: c_int,
    data: *const u8,
) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    let (Ok(total), Ok(chunk_len)) = (u64::try_from(datalen), usize::try_from(chunklen)) else {
        h.fail(&Error::system("negative length"));
        return 0;
    };
    if data.is_null() && chunk_len > 0 {
        h.fail(&Error::system("required argument is null"));
        return 0;
    }
    let chunk: &[u8] = if chunk_len == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(data, chunk_len) }
    };
    let result = unsafe { req_str(event) }.and_then(|e| h.conn.send_event(e, total, chunk));
    h.finish(result)
}

/// Receive at most `buf_len` payload bytes into `buf`.
/// On a chunk: sets `*event` (valid until the next call) and `*datalen` (total
/// payload length), returns bytes read. Returns -2 once the payload is
/// drained and -1 on failure.
#[no_mangle]
pub extern "C" fn mine_event_recv(
    h: *mut c_void,
    event: *mut *const c_char,
    datalen: *mut i64,
    buf: *mut u8,
    buf_len: usize,
) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return -1;
    };
    if buf.is_null() && buf_len > 0 {
        h.fail(&Error::system("required argument is null"));
        return -1;
    }
    let out: &mut [u8] = if buf_len == 0 {
        &mut []
    } else {
        let len = buf_len.min(c_int::MAX as usize);
        unsafe { slice::from_raw_parts_mut(buf, len) }
    };
    let delivery = match h.conn.recv_event(out) {
        Ok(Delivery::EndOfPayload) => return MINE_END_OF_PAYLOAD,
        Ok(Delivery::Chunk {
            event: name,
            total_len,
            len,
        }) => {
            let stale = h
                .event
                .as_ref()
                .map_or(true, |cached| cached.as_bytes() != name.as_bytes());
            if stale {
                h.event = CString::new(name).ok();
            }
            (total_len, len)
        }
        Err(e) => {
            h.fail(&e);
            return -1;
        }
    };
    let (total_len, len) = delivery;
    unsafe {
        if !event.is_null() {
            *event = h.event.as_ref().map_or(ptr::null(), |c| c.as_ptr());
        }
        if !datalen.is_null() {
            *datalen = i64::try_from(total_len).unwrap_or(i64::MAX);
        }
    }
    len as c_int
}

/// Text of the most recent failure, or null if nothing has failed yet.
#[no_mangle]
pub extern "C" fn mine_errstr(h: *mut c_void) -> *const c_char {
    match unsafe { handle(h) } {
        Some(h) => h.errstr.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
        None => ptr::null(),
    }
}

/// OS error code of the most recent failure; 0 for TLS and protocol failures.
#[no_mangle]
pub extern "C" fn mine_errcode(h: *mut c_void) -> c_int {
    match unsafe { handle(h) } {
        Some(h) => h.errcode,
        None => -1,
    }
}
