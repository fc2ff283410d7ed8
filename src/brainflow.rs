use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int};

use libloading::Library;
use ndarray::Array2;
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::error::HarnessError;
use crate::source::SignalSource;

const PRESET_DEFAULT: c_int = 0;
const STREAM_RINGBUF_PACKETS: c_int = 450_000;

#[cfg(target_os = "windows")]
const BOARD_CONTROLLER_LIB: &str = "BoardController.dll";
#[cfg(target_os = "macos")]
const BOARD_CONTROLLER_LIB: &str = "libBoardController.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
const BOARD_CONTROLLER_LIB: &str = "libBoardController.so";

/// BrainFlow board identifiers this harness knows how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum BoardId {
    Synthetic = -1,
    Cyton = 0,
    CytonDaisy = 2,
}

impl BoardId {
    pub fn name(self) -> &'static str {
        match self {
            BoardId::Synthetic => "Synthetic Board",
            BoardId::Cyton => "OpenBCI Cyton",
            BoardId::CytonDaisy => "OpenBCI Cyton+Daisy",
        }
    }
}

/// Wire contract for the C API's JSON input params.
#[derive(Serialize)]
struct BrainFlowInputParams {
    serial_port: String,
    mac_address: String,
    ip_address: String,
    ip_address_aux: String,
    ip_address_anc: String,
    ip_port: i32,
    ip_port_aux: i32,
    ip_port_anc: i32,
    ip_protocol: i32,
    other_info: String,
    timeout: i32,
    serial_number: String,
    file: String,
    file_aux: String,
    file_anc: String,
    master_board: i32,
}

impl BrainFlowInputParams {
    fn for_serial(port: &str) -> Self {
        Self {
            serial_port: port.to_string(),
            mac_address: String::new(),
            ip_address: String::new(),
            ip_address_aux: String::new(),
            ip_address_anc: String::new(),
            ip_port: 0,
            ip_port_aux: 0,
            ip_port_anc: 0,
            ip_protocol: 0,
            other_info: String::new(),
            timeout: 0,
            serial_number: String::new(),
            file: String::new(),
            file_aux: String::new(),
            file_anc: String::new(),
            master_board: -100, // NO_BOARD
        }
    }
}

struct BrainFlowApi {
    #[allow(dead_code)]
    lib: Library,
    prepare_session: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    start_stream: unsafe extern "C" fn(c_int, *const c_char, c_int, *const c_char) -> c_int,
    stop_stream: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    release_session: unsafe extern "C" fn(c_int, *const c_char) -> c_int,
    get_sampling_rate: unsafe extern "C" fn(c_int, c_int, *mut c_int) -> c_int,
    get_num_rows: unsafe extern "C" fn(c_int, c_int, *mut c_int) -> c_int,
    get_eeg_channels: unsafe extern "C" fn(c_int, c_int, *mut c_int, *mut c_int) -> c_int,
    get_board_data_count: unsafe extern "C" fn(c_int, *mut c_int, c_int, *const c_char) -> c_int,
    get_board_data:
        unsafe extern "C" fn(c_int, c_int, *mut c_double, c_int, *const c_char) -> c_int,
}

unsafe fn symbol<'a, T>(
    lib: &'a Library,
    name: &[u8],
) -> Result<libloading::Symbol<'a, T>, HarnessError> {
    lib.get(name).map_err(|err| {
        HarnessError::Connection(format!(
            "missing BrainFlow symbol {}: {err}",
            String::from_utf8_lossy(&name[..name.len() - 1])
        ))
    })
}

impl BrainFlowApi {
    fn load() -> Result<Self, HarnessError> {
        // The BoardController library must be resolvable from the working
        // directory or the loader path.
        let lib = unsafe { Library::new(BOARD_CONTROLLER_LIB) }.map_err(|err| {
            HarnessError::Connection(format!("{BOARD_CONTROLLER_LIB} not found: {err}"))
        })?;
        // Safety: signatures match the official BrainFlow C API.
        unsafe {
            Ok(Self {
                prepare_session: *symbol(&lib, b"prepare_session\0")?,
                start_stream: *symbol(&lib, b"start_stream\0")?,
                stop_stream: *symbol(&lib, b"stop_stream\0")?,
                release_session: *symbol(&lib, b"release_session\0")?,
                get_sampling_rate: *symbol(&lib, b"get_sampling_rate\0")?,
                get_num_rows: *symbol(&lib, b"get_num_rows\0")?,
                get_eeg_channels: *symbol(&lib, b"get_eeg_channels\0")?,
                get_board_data_count: *symbol(&lib, b"get_board_data_count\0")?,
                get_board_data: *symbol(&lib, b"get_board_data\0")?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static BrainFlowApi, HarnessError> {
        static API: OnceCell<BrainFlowApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }

    fn check_setup(code: c_int, ctx: &str) -> Result<(), HarnessError> {
        if code == 0 {
            Ok(())
        } else {
            Err(HarnessError::Connection(format!(
                "{ctx} failed (BrainFlow code {code})"
            )))
        }
    }

    fn check_stream(code: c_int, ctx: &str) -> Result<(), HarnessError> {
        if code == 0 {
            Ok(())
        } else {
            Err(HarnessError::Stream(format!(
                "{ctx} failed (BrainFlow code {code})"
            )))
        }
    }

    fn prepare(&self, board_id: c_int, input: &CString) -> Result<(), HarnessError> {
        Self::check_setup(
            unsafe { (self.prepare_session)(board_id, input.as_ptr()) },
            "prepare_session",
        )
    }

    fn start_stream(&self, board_id: c_int, input: &CString) -> Result<(), HarnessError> {
        Self::check_stream(
            unsafe {
                (self.start_stream)(
                    STREAM_RINGBUF_PACKETS,
                    std::ptr::null(),
                    board_id,
                    input.as_ptr(),
                )
            },
            "start_stream",
        )
    }

    fn stop_stream(&self, board_id: c_int, input: &CString) -> Result<(), HarnessError> {
        Self::check_stream(
            unsafe { (self.stop_stream)(board_id, input.as_ptr()) },
            "stop_stream",
        )
    }

    fn release(&self, board_id: c_int, input: &CString) -> Result<(), HarnessError> {
        Self::check_stream(
            unsafe { (self.release_session)(board_id, input.as_ptr()) },
            "release_session",
        )
    }

    fn sampling_rate(&self, board_id: c_int) -> Result<c_int, HarnessError> {
        let mut rate: c_int = 0;
        Self::check_setup(
            unsafe { (self.get_sampling_rate)(board_id, PRESET_DEFAULT, &mut rate as *mut c_int) },
            "get_sampling_rate",
        )?;
        Ok(rate)
    }

    fn num_rows(&self, board_id: c_int) -> Result<c_int, HarnessError> {
        let mut rows: c_int = 0;
        Self::check_setup(
            unsafe { (self.get_num_rows)(board_id, PRESET_DEFAULT, &mut rows as *mut c_int) },
            "get_num_rows",
        )?;
        Ok(rows)
    }

    fn eeg_channels(&self, board_id: c_int, max_channels: usize) -> Result<Vec<c_int>, HarnessError> {
        let mut out_len: c_int = 0;
        let mut buf = vec![0 as c_int; max_channels.max(32)];
        Self::check_setup(
            unsafe {
                (self.get_eeg_channels)(
                    board_id,
                    PRESET_DEFAULT,
                    buf.as_mut_ptr(),
                    &mut out_len as *mut c_int,
                )
            },
            "get_eeg_channels",
        )?;
        buf.truncate(out_len.max(0) as usize);
        Ok(buf)
    }

    fn board_data_count(&self, board_id: c_int, input: &CString) -> Result<usize, HarnessError> {
        let mut count: c_int = 0;
        Self::check_stream(
            unsafe {
                (self.get_board_data_count)(
                    PRESET_DEFAULT,
                    &mut count as *mut c_int,
                    board_id,
                    input.as_ptr(),
                )
            },
            "get_board_data_count",
        )?;
        Ok(count.max(0) as usize)
    }

    fn board_data(
        &self,
        board_id: c_int,
        input: &CString,
        num_samples: usize,
        buffer: &mut [f64],
    ) -> Result<(), HarnessError> {
        Self::check_stream(
            unsafe {
                (self.get_board_data)(
                    num_samples as c_int,
                    PRESET_DEFAULT,
                    buffer.as_mut_ptr(),
                    board_id,
                    input.as_ptr(),
                )
            },
            "get_board_data",
        )
    }
}

/// BrainFlow-backed acquisition session.
///
/// `connect` prepares the session and reads the board descriptors; the
/// stop-stream-then-release sequence runs exactly once on every exit path,
/// including drop.
pub struct BrainFlowSource {
    api: &'static BrainFlowApi,
    board_id: c_int,
    board: BoardId,
    input_json: CString,
    eeg_channels: Vec<usize>,
    num_rows: usize,
    sampling_rate_hz: f64,
    is_streaming: bool,
    released: bool,
}

impl BrainFlowSource {
    pub fn connect(board: BoardId, serial_port: &str) -> Result<Self, HarnessError> {
        let api = BrainFlowApi::instance()?;
        let params = BrainFlowInputParams::for_serial(serial_port);
        let json = serde_json::to_string(&params)
            .map_err(|err| HarnessError::Connection(err.to_string()))?;
        let input_json = CString::new(json)
            .map_err(|err| HarnessError::Connection(err.to_string()))?;
        let board_id = board as c_int;
        api.prepare(board_id, &input_json)?;
        let sampling_rate_hz = api.sampling_rate(board_id)? as f64;
        let num_rows = api.num_rows(board_id)?.max(0) as usize;
        let eeg_channels: Vec<usize> = api
            .eeg_channels(board_id, num_rows)?
            .into_iter()
            .filter_map(|ch| usize::try_from(ch).ok())
            .filter(|&ch| ch < num_rows)
            .collect();
        if eeg_channels.is_empty() {
            return Err(HarnessError::Connection(format!(
                "{} reports no EEG channels",
                board.name()
            )));
        }
        log::info!(
            "prepared {} ({} EEG channels at {} Hz)",
            board.name(),
            eeg_channels.len(),
            sampling_rate_hz
        );
        Ok(Self {
            api,
            board_id,
            board,
            input_json,
            eeg_channels,
            num_rows,
            sampling_rate_hz,
            is_streaming: false,
            released: false,
        })
    }

    pub fn board(&self) -> BoardId {
        self.board
    }

    /// Ordered board rows carrying EEG data, fixed for the session.
    pub fn eeg_channels(&self) -> &[usize] {
        &self.eeg_channels
    }

    pub fn start_stream(&mut self) -> Result<(), HarnessError> {
        if !self.is_streaming {
            self.api.start_stream(self.board_id, &self.input_json)?;
            self.is_streaming = true;
            log::info!("{} streaming", self.board.name());
        }
        Ok(())
    }
}

impl SignalSource for BrainFlowSource {
    /// Drains every sample that arrived since the last poll. Rows of the
    /// flat FFI buffer are board rows, each `count` wide; only the EEG rows
    /// are kept, in channel order.
    fn poll(&mut self) -> Result<Array2<f64>, HarnessError> {
        if self.released {
            return Err(HarnessError::Stream(
                "poll on a released session".to_owned(),
            ));
        }
        let count = self.api.board_data_count(self.board_id, &self.input_json)?;
        if count == 0 {
            return Ok(Array2::zeros((self.eeg_channels.len(), 0)));
        }
        let mut buf = vec![0.0f64; self.num_rows * count];
        self.api
            .board_data(self.board_id, &self.input_json, count, &mut buf)?;
        let burst = Array2::from_shape_fn((self.eeg_channels.len(), count), |(ch, i)| {
            buf[self.eeg_channels[ch] * count + i]
        });
        Ok(burst)
    }

    fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    fn channel_count(&self) -> usize {
        self.eeg_channels.len()
    }

    /// Stops the stream and releases the session exactly once. A stop-stream
    /// failure does not skip the release.
    fn stop(&mut self) -> Result<(), HarnessError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let stop_result = if self.is_streaming {
            self.is_streaming = false;
            self.api.stop_stream(self.board_id, &self.input_json)
        } else {
            Ok(())
        };
        let release_result = self.api.release(self.board_id, &self.input_json);
        stop_result.and(release_result)
    }
}

impl Drop for BrainFlowSource {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("failed to release BrainFlow session: {err}");
        }
    }
}
