// client: line-oriented client over a plain or TLS outgoer, for tools and tests
use hio::{Config, Outgoer, OutgoerTls, Result, Transport, Verbosity, WireLog};

/// Plain or TLS client, chosen by whether the config has a `[tls]` section.
pub enum Dialer {
    Plain(Outgoer),
    Tls(OutgoerTls),
}

impl Dialer {
    pub fn transport(&mut self) -> &mut dyn Transport {
        match self {
            Dialer::Plain(outgoer) => outgoer,
            Dialer::Tls(outgoer) => outgoer,
        }
    }

    pub fn outgoer(&self) -> &Outgoer {
        match self {
            Dialer::Plain(outgoer) => outgoer,
            Dialer::Tls(outgoer) => outgoer.outgoer(),
        }
    }

    pub fn open(&mut self) -> bool {
        match self {
            Dialer::Plain(outgoer) => outgoer.open(),
            Dialer::Tls(outgoer) => outgoer.open(),
        }
    }

    pub fn service_connect(&mut self) -> Result<bool> {
        match self {
            Dialer::Plain(outgoer) => outgoer.service_connect(),
            Dialer::Tls(outgoer) => outgoer.service_connect(),
        }
    }
}

/// Sends lines and collects newline-terminated replies from `rxbs`.
pub struct LineClient {
    dialer: Dialer,
    // bytes of rxbs already split into lines
    index: usize,
}

impl LineClient {
    pub fn new(dialer: Dialer) -> Self {
        LineClient { dialer, index: 0 }
    }

    /// Build from the `[client]`, `[tls]` and `[log]` sections.
    pub fn from_config(config: &Config, wlog: Option<WireLog>) -> Result<Self> {
        let section = &config.client;
        let mut outgoer = Outgoer::new(&section.host, section.port, section.bufsize)?
            .with_verbosity(config.log.verbosity);
        if let Some(timeout) = section.reconnect() {
            outgoer = outgoer.reconnectable(timeout);
        }
        if let Some(wlog) = wlog {
            outgoer = outgoer.with_wirelog(wlog);
        }
        let dialer = match &config.tls {
            Some(tls) => Dialer::Tls(OutgoerTls::from_outgoer(outgoer, tls)?),
            None => Dialer::Plain(outgoer),
        };
        Ok(Self::new(dialer))
    }

    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }

    pub fn open(&mut self) -> bool {
        self.index = 0;
        self.dialer.open()
    }

    pub fn connected(&mut self) -> bool {
        self.dialer.transport().connected()
    }

    pub fn cutoff(&mut self) -> bool {
        self.dialer.transport().cutoff()
    }

    /// Queue one line; a trailing newline is added when missing.
    pub fn send_line(&mut self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        if !data.ends_with(b"\n") {
            data.push(b'\n');
        }
        self.dialer.transport().tx(&data);
    }

    /// One poll tick: connect, flush queued lines, pull in replies.
    pub fn service(&mut self) -> Result<bool> {
        if !self.dialer.service_connect()? {
            return Ok(false);
        }
        let transport = self.dialer.transport();
        transport.service_txes()?;
        transport.service_all_rx()?;
        Ok(true)
    }

    /// Complete lines received since the last call, newline stripped.
    pub fn take_lines(&mut self) -> Vec<String> {
        let transport = self.dialer.transport();
        let (tail, len) = transport.tail_rxbs(self.index);
        let Some(last) = tail.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let lines = tail[..last]
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect();
        self.index = len - tail.len() + last + 1;
        if self.index == len {
            transport.clear_rxbs();
            self.index = 0;
        }
        lines
    }

    pub fn verbosity(&self) -> Verbosity {
        self.dialer.outgoer().link().verbosity()
    }
}
