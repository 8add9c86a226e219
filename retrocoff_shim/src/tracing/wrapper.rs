// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Tracing decorator for [`DosApi`]
//!
//! Every wrapper call produces a call event carrying its arguments and a
//! return event carrying the result, tagged with the wrapper table index.

use std::fmt::Debug;
use std::sync::Arc;

use crate::syscalls::dos::{DosApi, DosDateTime, DosResult, SpawnRequest, SystemTimeRecord};
use crate::syscalls::table::WrapperIndex;
use crate::tracing::{TraceEvent, Tracer};

/// [`DosApi`] implementation that traces and forwards to `inner`
pub struct TracedDosApi<T: DosApi> {
    inner: T,
    tracer: Arc<Tracer>,
}

impl<T: DosApi> TracedDosApi<T> {
    pub fn new(inner: T, tracer: Arc<Tracer>) -> Self {
        Self { inner, tracer }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn enter(&self, wrapper: WrapperIndex, args: impl FnOnce() -> String) {
        if self.tracer.is_enabled() {
            let event = TraceEvent::call(wrapper.name(), wrapper.category())
                .with_index(wrapper.index())
                .with_args(args());
            self.tracer.trace(event);
        }
    }

    fn leave<R: Debug>(&self, wrapper: WrapperIndex, result: &R) {
        if self.tracer.is_enabled() {
            let event = TraceEvent::return_event(wrapper.name(), wrapper.category())
                .with_index(wrapper.index())
                .with_return_value(format!("{result:?}"));
            self.tracer.trace(event);
        }
    }

    fn traced<R: Debug>(
        &mut self,
        wrapper: WrapperIndex,
        args: impl FnOnce() -> String,
        call: impl FnOnce(&mut T) -> R,
    ) -> R {
        self.enter(wrapper, args);
        let result = call(&mut self.inner);
        self.leave(wrapper, &result);
        result
    }
}

impl<T: DosApi> DosApi for TracedDosApi<T> {
    fn record_error(&mut self, code: u16) {
        self.inner.record_error(code);
    }

    fn grow_heap(&mut self, new_top: usize) -> DosResult<()> {
        self.traced(
            WrapperIndex::GrowHeap,
            || format!("new_top=0x{new_top:08x}"),
            |api| api.grow_heap(new_top),
        )
    }

    fn open(&mut self, path: &str, mode: i32) -> DosResult<i32> {
        self.traced(
            WrapperIndex::OpenFile,
            || format!("path={path:?}, mode={mode}"),
            |api| api.open(path, mode),
        )
    }

    fn create(&mut self, path: &str, attributes: i32) -> DosResult<i32> {
        self.traced(
            WrapperIndex::CreateFile,
            || format!("path={path:?}, attributes=0x{attributes:x}"),
            |api| api.create(path, attributes),
        )
    }

    fn write(&mut self, fd: i32, data: &[u8]) -> DosResult<usize> {
        self.traced(
            WrapperIndex::Write,
            || format!("fd={fd}, size={}", data.len()),
            |api| api.write(fd, data),
        )
    }

    fn read(&mut self, fd: i32, buffer: &mut [u8]) -> DosResult<usize> {
        let size = buffer.len();
        self.traced(
            WrapperIndex::Read,
            || format!("fd={fd}, size={size}"),
            |api| api.read(fd, buffer),
        )
    }

    fn close(&mut self, fd: i32) -> DosResult<()> {
        self.traced(WrapperIndex::Close, || format!("fd={fd}"), |api| api.close(fd))
    }

    fn seek(&mut self, fd: i32, offset: i64, whence: i32) -> DosResult<u64> {
        self.traced(
            WrapperIndex::Seek,
            || format!("fd={fd}, offset={offset}, whence={whence}"),
            |api| api.seek(fd, offset, whence),
        )
    }

    fn get_attributes(&mut self, path: &str) -> DosResult<u32> {
        self.traced(
            WrapperIndex::FileAttributes,
            || format!("path={path:?}, get"),
            |api| api.get_attributes(path),
        )
    }

    fn set_attributes(&mut self, path: &str, attributes: u32) -> DosResult<()> {
        self.traced(
            WrapperIndex::FileAttributes,
            || format!("path={path:?}, set=0x{attributes:x}"),
            |api| api.set_attributes(path, attributes),
        )
    }

    fn set_dta(&mut self, address: usize) {
        self.traced(
            WrapperIndex::SetDta,
            || format!("dta=0x{address:08x}"),
            |api| api.set_dta(address),
        );
    }

    fn find_first(&mut self, pattern: &str, attributes: u32) -> DosResult<()> {
        self.traced(
            WrapperIndex::FindFirst,
            || format!("pattern={pattern:?}, attributes=0x{attributes:x}"),
            |api| api.find_first(pattern, attributes),
        )
    }

    fn find_next(&mut self) -> DosResult<()> {
        self.traced(WrapperIndex::FindNext, String::new, |api| api.find_next())
    }

    fn find_close(&mut self) {
        self.traced(WrapperIndex::FindClose, String::new, |api| api.find_close());
    }

    fn is_terminal(&mut self, fd: i32) -> DosResult<bool> {
        self.traced(
            WrapperIndex::IsTerminal,
            || format!("fd={fd}"),
            |api| api.is_terminal(fd),
        )
    }

    fn file_time(&mut self, fd: i32) -> DosResult<DosDateTime> {
        self.traced(
            WrapperIndex::GetFileTime,
            || format!("fd={fd}"),
            |api| api.file_time(fd),
        )
    }

    fn local_time(&mut self) -> DosResult<SystemTimeRecord> {
        self.traced(WrapperIndex::GetLocalTime, String::new, |api| api.local_time())
    }

    fn set_file_time(&mut self, fd: i32, stamp: DosDateTime) -> DosResult<()> {
        self.traced(
            WrapperIndex::SetFileTime,
            || format!("fd={fd}, date=0x{:04x}, time=0x{:04x}", stamp.date, stamp.time),
            |api| api.set_file_time(fd, stamp),
        )
    }

    fn make_dir(&mut self, path: &str) -> DosResult<()> {
        self.traced(
            WrapperIndex::MakeDir,
            || format!("path={path:?}"),
            |api| api.make_dir(path),
        )
    }

    fn remove_dir(&mut self, path: &str) -> DosResult<()> {
        self.traced(
            WrapperIndex::RemoveDir,
            || format!("path={path:?}"),
            |api| api.remove_dir(path),
        )
    }

    fn remove_file(&mut self, path: &str) -> DosResult<()> {
        self.traced(
            WrapperIndex::RemoveFile,
            || format!("path={path:?}"),
            |api| api.remove_file(path),
        )
    }

    fn rename(&mut self, from: &str, to: &str) -> DosResult<()> {
        self.traced(
            WrapperIndex::Rename,
            || format!("from={from:?}, to={to:?}"),
            |api| api.rename(from, to),
        )
    }

    fn current_dir(&mut self) -> DosResult<String> {
        self.traced(WrapperIndex::GetCurrentDir, String::new, |api| api.current_dir())
    }

    fn change_dir(&mut self, path: &str) -> DosResult<()> {
        self.traced(
            WrapperIndex::ChangeDir,
            || format!("path={path:?}"),
            |api| api.change_dir(path),
        )
    }

    fn spawn(&mut self, program: &str, request: &SpawnRequest) -> DosResult<()> {
        self.traced(
            WrapperIndex::Spawn,
            || {
                format!(
                    "program={program:?}, tail={:?}, env_vars={}",
                    String::from_utf8_lossy(&request.command_tail),
                    request.environment.len()
                )
            },
            |api| api.spawn(program, request),
        )
    }

    fn exit_status(&mut self) -> i32 {
        self.traced(WrapperIndex::GetExitStatus, String::new, |api| api.exit_status())
    }

    fn dup(&mut self, fd: i32) -> DosResult<i32> {
        self.traced(WrapperIndex::Dup, || format!("fd={fd}"), |api| api.dup(fd))
    }

    fn dup2(&mut self, src: i32, dst: i32) -> DosResult<i32> {
        self.traced(
            WrapperIndex::Dup2,
            || format!("src={src}, dst={dst}"),
            |api| api.dup2(src, dst),
        )
    }

    fn terminate(&mut self, status: i32) -> ! {
        self.enter(WrapperIndex::Exit, || format!("status={status}"));
        self.inner.terminate(status)
    }

    fn sleep(&mut self, milliseconds: u64) {
        self.traced(
            WrapperIndex::Sleep,
            || format!("milliseconds={milliseconds}"),
            |api| api.sleep(milliseconds),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscalls::dos::DosError;
    use crate::tracing::{TraceConfig, TraceFilter};
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockDosApi {
        last_error: Option<u16>,
        opened: Vec<String>,
    }

    impl DosApi for MockDosApi {
        fn record_error(&mut self, code: u16) {
            self.last_error = Some(code);
        }
        fn grow_heap(&mut self, _new_top: usize) -> DosResult<()> {
            Ok(())
        }
        fn open(&mut self, path: &str, _mode: i32) -> DosResult<i32> {
            self.opened.push(path.to_string());
            if path == "MISSING" {
                Err(DosError::FileNotFound)
            } else {
                Ok(5)
            }
        }
        fn create(&mut self, _path: &str, _attributes: i32) -> DosResult<i32> {
            Ok(6)
        }
        fn write(&mut self, _fd: i32, data: &[u8]) -> DosResult<usize> {
            Ok(data.len())
        }
        fn read(&mut self, _fd: i32, _buffer: &mut [u8]) -> DosResult<usize> {
            Ok(0)
        }
        fn close(&mut self, _fd: i32) -> DosResult<()> {
            Ok(())
        }
        fn seek(&mut self, _fd: i32, offset: i64, _whence: i32) -> DosResult<u64> {
            u64::try_from(offset).map_err(|_| DosError::Seek)
        }
        fn get_attributes(&mut self, _path: &str) -> DosResult<u32> {
            Ok(0x20)
        }
        fn set_attributes(&mut self, _path: &str, _attributes: u32) -> DosResult<()> {
            Ok(())
        }
        fn set_dta(&mut self, _address: usize) {}
        fn find_first(&mut self, _pattern: &str, _attributes: u32) -> DosResult<()> {
            Err(DosError::Unreported)
        }
        fn find_next(&mut self) -> DosResult<()> {
            Err(DosError::Unreported)
        }
        fn find_close(&mut self) {}
        fn is_terminal(&mut self, _fd: i32) -> DosResult<bool> {
            Ok(false)
        }
        fn file_time(&mut self, _fd: i32) -> DosResult<DosDateTime> {
            Ok(DosDateTime::default())
        }
        fn local_time(&mut self) -> DosResult<SystemTimeRecord> {
            Ok(SystemTimeRecord::default())
        }
        fn set_file_time(&mut self, _fd: i32, _stamp: DosDateTime) -> DosResult<()> {
            Err(DosError::InvalidFunction)
        }
        fn make_dir(&mut self, _path: &str) -> DosResult<()> {
            Ok(())
        }
        fn remove_dir(&mut self, _path: &str) -> DosResult<()> {
            Ok(())
        }
        fn remove_file(&mut self, _path: &str) -> DosResult<()> {
            Ok(())
        }
        fn rename(&mut self, _from: &str, _to: &str) -> DosResult<()> {
            Ok(())
        }
        fn current_dir(&mut self) -> DosResult<String> {
            Ok("\\tmp".to_string())
        }
        fn change_dir(&mut self, _path: &str) -> DosResult<()> {
            Ok(())
        }
        fn spawn(&mut self, _program: &str, _request: &SpawnRequest) -> DosResult<()> {
            Ok(())
        }
        fn exit_status(&mut self) -> i32 {
            0
        }
        fn dup(&mut self, _fd: i32) -> DosResult<i32> {
            Ok(7)
        }
        fn dup2(&mut self, _src: i32, dst: i32) -> DosResult<i32> {
            Ok(dst)
        }
        fn terminate(&mut self, status: i32) -> ! {
            std::process::exit(status)
        }
        fn sleep(&mut self, _milliseconds: u64) {}
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn traced(enabled: bool) -> (TracedDosApi<MockDosApi>, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let config = TraceConfig {
            enabled,
            ..TraceConfig::default()
        }
        .with_timestamps(false);
        let tracer = Tracer::with_writer(config, TraceFilter::default(), Box::new(buffer.clone()));
        (
            TracedDosApi::new(MockDosApi::default(), Arc::new(tracer)),
            buffer,
        )
    }

    #[test]
    fn test_traced_api_disabled_forwards() {
        let (mut api, buffer) = traced(false);
        assert_eq!(api.open("A.TXT", 0), Ok(5));
        assert_eq!(api.inner().opened, vec!["A.TXT".to_string()]);
        assert!(buffer.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_traced_api_emits_call_and_return() {
        let (mut api, buffer) = traced(true);
        assert_eq!(api.open("MISSING", 0), Err(DosError::FileNotFound));

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "#01 CALL   open_file(path=\"MISSING\", mode=0)");
        assert_eq!(lines[1], "#01 RETURN open_file() -> Err(FileNotFound)");
    }

    #[test]
    fn test_record_error_is_not_traced() {
        let (mut api, buffer) = traced(true);
        api.record_error(2);
        assert_eq!(api.inner().last_error, Some(2));
        assert!(buffer.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unit_results_are_traced() {
        let (mut api, buffer) = traced(true);
        api.sleep(10);
        api.find_close();
        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("#30 CALL   sleep(milliseconds=10)"));
        assert!(output.contains("#11 RETURN find_close() -> ()"));
    }
}
