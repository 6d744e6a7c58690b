//! Serial port link
//!
//! `SerialPortLink` opens a port through `mio_serial` and hands it to a
//! dedicated poller thread, which:
//! - reads whatever the port has, decodes it as text and reports it as
//!   `LinkEvent::Data`, in arrival order;
//! - writes queued outgoing text, buffering whatever the OS does not take
//!   and draining it when the port becomes writable again;
//! - reports `StatusChanged(Closed)` or `StatusChanged(Error)` when it
//!   stops, whether because the link was closed, the device went away or
//!   an I/O error occurred.
//!
//! Outgoing text reaches the thread over a crossbeam channel; a `mio::Waker`
//! wakes the poll when something is queued or the link is closed.

use super::iobuf::{IOBuf, Refill, TxBuf};
use super::{
    ConnectionStatus, Handshake, LinkError, LinkEvent, Parity, PortSettings, SerialLink, StopBits,
};
use crossbeam::channel;
use mio_serial::SerialPortBuilderExt;
use std::io;
use std::sync::Arc;
use std::thread;

const WAKER: mio::Token = mio::Token(0);
const PORT: mio::Token = mio::Token(1);

/// Capacity of the outgoing queue, in send calls.
const DEFAULT_TX_CHANNEL_SIZE: usize = 64;

/// Receives every `LinkEvent`. Returning an error stops the poller thread.
pub type Notify = Arc<dyn Fn(LinkEvent) -> io::Result<()> + Send + Sync>;

/// A running poller thread.
struct Session {
    tx: channel::Sender<Vec<u8>>,
    waker: mio::Waker,
    thread: thread::JoinHandle<()>,
}

pub struct SerialPortLink {
    notify: Notify,
    session: Option<Session>,
}

fn data_bits(bits: u8) -> Result<mio_serial::DataBits, LinkError> {
    match bits {
        5 => Ok(mio_serial::DataBits::Five),
        6 => Ok(mio_serial::DataBits::Six),
        7 => Ok(mio_serial::DataBits::Seven),
        8 => Ok(mio_serial::DataBits::Eight),
        other => Err(LinkError::Unsupported(format!("{} data bits", other))),
    }
}

fn parity(parity: Parity) -> Result<mio_serial::Parity, LinkError> {
    match parity {
        Parity::None => Ok(mio_serial::Parity::None),
        Parity::Even => Ok(mio_serial::Parity::Even),
        Parity::Odd => Ok(mio_serial::Parity::Odd),
        other => Err(LinkError::Unsupported(format!("parity {:?}", other))),
    }
}

fn stop_bits(stop_bits: StopBits) -> Result<mio_serial::StopBits, LinkError> {
    match stop_bits {
        StopBits::One => Ok(mio_serial::StopBits::One),
        StopBits::Two => Ok(mio_serial::StopBits::Two),
        other => Err(LinkError::Unsupported(format!("stop bits {:?}", other))),
    }
}

fn flow_control(handshake: Handshake) -> mio_serial::FlowControl {
    match handshake {
        Handshake::None => mio_serial::FlowControl::None,
        Handshake::XOnXOff => mio_serial::FlowControl::Software,
        Handshake::RequestToSend => mio_serial::FlowControl::Hardware,
        Handshake::RequestToSendXOnXOff => {
            tracing::warn!("combined RTS and XON/XOFF handshake not available, using RTS only");
            mio_serial::FlowControl::Hardware
        }
    }
}

impl SerialPortLink {
    /// Creates a closed link reporting to `notify`.
    pub fn new<F: Fn(LinkEvent) -> io::Result<()> + Send + Sync + 'static>(
        notify: F,
    ) -> SerialPortLink {
        SerialPortLink {
            notify: Arc::new(notify),
            session: None,
        }
    }

    /// Returns a notify callback forwarding events to `sender`, mapped
    /// through `wrap`. Events are never dropped; once the receiving side is
    /// gone the poller thread stops.
    pub fn to_channel<T: Send + 'static>(
        sender: channel::Sender<T>,
        wrap: fn(LinkEvent) -> T,
    ) -> impl Fn(LinkEvent) -> io::Result<()> + Send + Sync + 'static {
        move |event| {
            sender
                .send(wrap(event))
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    /// Runs the link over an already open byte stream, e.g. a pty.
    pub fn attach<S>(&mut self, stream: S, name: &str) -> Result<(), LinkError>
    where
        S: io::Read + io::Write + mio::event::Source + Send + 'static,
    {
        self.close();
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), WAKER)?;
        let (tx, ttx) = channel::bounded::<Vec<u8>>(DEFAULT_TX_CHANNEL_SIZE);
        // Reported before the thread starts, so it precedes any data.
        let _ = (self.notify)(LinkEvent::StatusChanged(ConnectionStatus::Open(
            name.to_string(),
        )));
        let notify = self.notify.clone();
        let thread = thread::Builder::new()
            .name(format!("link {}", name))
            .spawn(move || SerialPortLink::poller_thread(stream, poll, notify, ttx))?;
        self.session = Some(Session { tx, waker, thread });
        Ok(())
    }

    /// Poller thread event loop. Owns the stream until the link closes.
    fn poller_thread<S: io::Read + io::Write + mio::event::Source>(
        mut stream: S,
        mut poll: mio::Poll,
        notify: Notify,
        tx: channel::Receiver<Vec<u8>>,
    ) {
        let status = match SerialPortLink::poll_stream(&mut stream, &mut poll, &notify, &tx) {
            Ok(()) => ConnectionStatus::Closed,
            Err(e) => {
                tracing::warn!(error = %e, "serial link failed");
                ConnectionStatus::Error(e.to_string())
            }
        };
        let _ = poll.registry().deregister(&mut stream);
        let _ = notify(LinkEvent::StatusChanged(status));
    }

    fn poll_stream<S: io::Read + io::Write + mio::event::Source>(
        stream: &mut S,
        poll: &mut mio::Poll,
        notify: &Notify,
        tx: &channel::Receiver<Vec<u8>>,
    ) -> io::Result<()> {
        use crossbeam::channel::TryRecvError;

        let mut events = mio::Events::with_capacity(4);
        let mut rxbuf = IOBuf::new();
        let mut txbuf = TxBuf::new();
        let mut needs_draining = false;

        poll.registry()
            .register(stream, PORT, mio::Interest::READABLE)?;

        loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            let mut check_tx_channel = false;

            for event in events.iter() {
                match event.token() {
                    WAKER => {
                        check_tx_channel = true;
                    }
                    PORT => {
                        // On windows the port always shows up as writable,
                        // so only act on it while there is something to drain.
                        if event.is_writable() && needs_draining {
                            check_tx_channel = true;
                        }
                        loop {
                            match rxbuf.refill(stream)? {
                                Refill::Data => {
                                    let text = rxbuf.take_text();
                                    if !text.is_empty() && notify(LinkEvent::Data(text)).is_err() {
                                        // Nobody is listening anymore.
                                        return Ok(());
                                    }
                                }
                                Refill::NotReady => break,
                                Refill::Disconnected => return Ok(()),
                            }
                        }
                    }
                    _ => {}
                }
            }

            if check_tx_channel {
                loop {
                    match tx.try_recv() {
                        Ok(bytes) => txbuf.push(&bytes),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => return Ok(()),
                    }
                }
                let drained = txbuf.drain(stream)?;
                if drained == needs_draining {
                    needs_draining = !drained;
                    let interest = if needs_draining {
                        mio::Interest::READABLE.add(mio::Interest::WRITABLE)
                    } else {
                        mio::Interest::READABLE
                    };
                    poll.registry().reregister(stream, PORT, interest)?;
                }
            }
        }
    }
}

impl SerialLink for SerialPortLink {
    fn open(&mut self, settings: &PortSettings) -> Result<(), LinkError> {
        let builder = mio_serial::new(&settings.port, settings.rate)
            .data_bits(data_bits(settings.data_bits)?)
            .parity(parity(settings.parity)?)
            .stop_bits(stop_bits(settings.stop_bits)?)
            .flow_control(flow_control(settings.handshake));
        self.close();
        let port = builder.open_native_async().map_err(|e| {
            LinkError::PortUnavailable {
                port: settings.port.clone(),
                reason: e.description,
            }
        })?;
        #[cfg(windows)]
        {
            // Windows requires some custom settings to replicate the unix behavior.
            use std::os::windows::io::AsRawHandle;
            use winapi::um::commapi::SetCommTimeouts;
            use winapi::um::winbase::COMMTIMEOUTS;
            let handle = port.as_raw_handle();
            let mut timeouts = COMMTIMEOUTS {
                ReadIntervalTimeout: 0xFFFFFFFF,
                ReadTotalTimeoutMultiplier: 0xFFFFFFFF,
                ReadTotalTimeoutConstant: 0xFFFFFFFE,
                WriteTotalTimeoutMultiplier: 0,
                WriteTotalTimeoutConstant: 0,
            };
            if unsafe { SetCommTimeouts(handle as _, &mut timeouts) } == 0 {
                return Err(LinkError::IO(io::Error::last_os_error()));
            }
        }
        tracing::info!(settings = %settings, "serial port opened");
        self.attach(port, &settings.port)
    }

    fn send(&self, text: &str) -> Result<(), LinkError> {
        use crossbeam::channel::TrySendError;
        let session = self.session.as_ref().ok_or(LinkError::NotOpen)?;
        match session.tx.try_send(text.as_bytes().to_vec()) {
            Ok(()) => {
                session.waker.wake()?;
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(LinkError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(LinkError::NotOpen),
        }
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let Session { tx, waker, thread } = session;
            drop(tx);
            if let Err(e) = waker.wake() {
                tracing::warn!(error = %e, "failed to wake serial poller");
            }
            if thread.join().is_err() {
                tracing::warn!("serial poller thread panicked");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| !session.thread.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SerialPortLink {
    fn drop(&mut self) {
        self.close();
    }
}
