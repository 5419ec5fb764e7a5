//! JVM binding for `io.ipcbuffer.IpcBuffer`.
//!
//! Views cross the boundary as boxed handles in a `long`. Every handle
//! returned by `create`, `open` or `slice` must be given back to `free`.
//! Errors are rethrown as Java exceptions and the call returns a zero value.

use std::error::Error;

use jni::objects::{JClass, JString};
use jni::sys::{jint, jlong, jstring};
use jni::JNIEnv;
use serde::{Deserialize, Serialize};

use ipcbuffer::{pool, Encoding, IpcBufferError, PoolConfig, SegmentKey, View};

#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
struct JniConfig {
    pool: PoolConfig,
}

type JniResult<T> = Result<T, Box<dyn Error>>;

fn throw(env: &mut JNIEnv, err: &(dyn Error + 'static)) {
    let class = match err.downcast_ref::<IpcBufferError>() {
        Some(IpcBufferError::OutOfBounds { .. }) => "java/lang/IndexOutOfBoundsException",
        Some(IpcBufferError::AlreadyConfigured) => "java/lang/IllegalStateException",
        Some(IpcBufferError::AllocationFailed { .. }) => "java/lang/OutOfMemoryError",
        Some(IpcBufferError::SharedMemory(_)) | Some(IpcBufferError::SegmentTooSmall { .. }) => {
            "java/io/IOException"
        }
        _ => "java/lang/IllegalArgumentException",
    };
    // A pending exception from the JVM side wins over ours.
    let _ = env.throw_new(class, err.to_string());
}

fn or_throw<T: Default>(env: &mut JNIEnv, result: JniResult<T>) -> T {
    result.unwrap_or_else(|err| {
        throw(env, err.as_ref());
        T::default()
    })
}

fn to_usize(value: jint, position: usize) -> Result<usize, IpcBufferError> {
    usize::try_from(value).map_err(|_| IpcBufferError::InvalidArgument {
        position,
        expected: "a non-negative int",
    })
}

fn into_handle(view: View) -> jlong {
    Box::into_raw(Box::new(view)) as jlong
}

/// # Safety
/// `handle` must come from `into_handle` and not have been freed.
unsafe fn view<'a>(handle: jlong) -> &'a View {
    &*(handle as *const View)
}

fn encoding(env: &mut JNIEnv, name: &JString) -> JniResult<Encoding> {
    if name.is_null() {
        return Ok(Encoding::Utf8);
    }
    let name: String = env.get_string(name)?.into();
    Ok(name.parse()?)
}

#[no_mangle]
pub extern "system" fn Java_io_ipcbuffer_IpcBuffer_configure(
    mut env: JNIEnv, _class: JClass, j_config_path: JString,
) {
    let result = (|| -> JniResult<()> {
        let config_path: String = env.get_string(&j_config_path)?.into();
        let cfg: JniConfig = confy::load_path(config_path)?;
        pool::configure(cfg.pool)?;
        Ok(())
    })();
    or_throw(&mut env, result)
}

#[no_mangle]
pub extern "system" fn Java_io_ipcbuffer_IpcBuffer_create(
    mut env: JNIEnv, _class: JClass, length: jint,
) -> jlong {
    let result = to_usize(length, 1)
        .and_then(View::with_length)
        .map(into_handle)
        .map_err(Into::into);
    or_throw(&mut env, result)
}

#[no_mangle]
pub extern "system" fn Java_io_ipcbuffer_IpcBuffer_open(
    mut env: JNIEnv, _class: JClass, length: jint, j_key: JString,
) -> jlong {
    let result = (|| -> JniResult<jlong> {
        let length = to_usize(length, 1)?;
        let key: String = env.get_string(&j_key)?.into();
        let key: SegmentKey = key.parse()?;
        Ok(into_handle(View::open(length, &key)?))
    })();
    or_throw(&mut env, result)
}

#[no_mangle]
pub unsafe extern "system" fn Java_io_ipcbuffer_IpcBuffer_slice(
    mut env: JNIEnv, _class: JClass, handle: jlong, start: jint, end: jint,
) -> jlong {
    let view = view(handle);
    let result = (|| -> JniResult<jlong> {
        let start = to_usize(start, 1)?;
        let end = to_usize(end, 2)?;
        Ok(into_handle(view.slice(start..end)?))
    })();
    or_throw(&mut env, result)
}

#[no_mangle]
pub unsafe extern "system" fn Java_io_ipcbuffer_IpcBuffer_get(
    mut env: JNIEnv, _class: JClass, handle: jlong, index: jint,
) -> jint {
    let view = view(handle);
    let result = to_usize(index, 1)
        .and_then(|index| view.get(index))
        .map(jint::from)
        .map_err(Into::into);
    or_throw(&mut env, result)
}

#[no_mangle]
pub unsafe extern "system" fn Java_io_ipcbuffer_IpcBuffer_set(
    mut env: JNIEnv, _class: JClass, handle: jlong, index: jint, value: jint,
) {
    let view = view(handle);
    // Stored modulo 256, like any integer assigned to a byte cell.
    let result = to_usize(index, 1)
        .and_then(|index| view.set(index, (value & 0xff) as u8))
        .map_err(Into::into);
    or_throw(&mut env, result)
}

#[no_mangle]
pub unsafe extern "system" fn Java_io_ipcbuffer_IpcBuffer_write(
    mut env: JNIEnv, _class: JClass, handle: jlong, j_text: JString, offset: jint,
    j_encoding: JString,
) -> jint {
    let view = view(handle);
    let result = (|| -> JniResult<jint> {
        let text: String = env.get_string(&j_text)?.into();
        let offset = to_usize(offset, 2)?;
        let encoding = encoding(&mut env, &j_encoding)?;
        let written = view.write(&text, offset, encoding)?;
        Ok(jint::try_from(written)?)
    })();
    or_throw(&mut env, result)
}

#[no_mangle]
pub unsafe extern "system" fn Java_io_ipcbuffer_IpcBuffer_toString(
    mut env: JNIEnv, _class: JClass, handle: jlong, j_encoding: JString, start: jint, end: jint,
) -> jstring {
    let view = view(handle);
    let result = (|| -> JniResult<jstring> {
        let encoding = encoding(&mut env, &j_encoding)?;
        // Negative bounds clamp to 0, as a missing start would.
        let start = usize::try_from(start).unwrap_or(0);
        let end = usize::try_from(end).unwrap_or(0);
        let text = view.decode(encoding, start..end)?;
        Ok(env.new_string(text)?.into_raw())
    })();
    match result {
        Ok(text) => text,
        Err(err) => {
            throw(&mut env, err.as_ref());
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "system" fn Java_io_ipcbuffer_IpcBuffer_length(
    _env: JNIEnv, _class: JClass, handle: jlong,
) -> jint {
    jint::try_from(view(handle).len()).unwrap_or(jint::MAX)
}

#[no_mangle]
pub unsafe extern "system" fn Java_io_ipcbuffer_IpcBuffer_free(
    _env: JNIEnv, _class: JClass, handle: jlong,
) {
    if handle != 0 {
        drop(Box::from_raw(handle as *mut View));
    }
}
