use std::io::{self, Write};

use crate::{Error, Message};

/// Separator emitted between consecutive messages on a stream.
const DELIMITER: u8 = 0;

/**
Frames a sequence of messages onto a byte sink.

Messages are separated by a single NUL byte; no delimiter precedes
the first message or follows the last one, so `N` writes produce
exactly `N - 1` delimiters.

Writes are synchronous. Concurrent calls to [`Encoder::write`] on one
encoder must be serialized by the caller; `&mut self` enforces that
for a single instance.
*/
#[derive(Debug)]
pub struct Encoder<W> {
    writer: W,
    msg_count: usize,
}

impl<W> Encoder<W>
where
    W: Write,
{
    pub fn new(writer: W) -> Self {
        Encoder {
            writer,
            msg_count: 0,
        }
    }

    /**
    Encode a message and write it to the sink.

    If encoding fails, nothing is written. If the sink fails mid-write
    the error is returned as-is; the message may have been partially
    written and no rollback is attempted.
    */
    pub fn write(&mut self, msg: &Message) -> Result<(), Error> {
        let raw = msg.to_gelf()?;

        if self.msg_count > 0 {
            self.write_all(&[DELIMITER])?;
        }
        self.write_all(&raw)?;

        self.msg_count += 1;
        Ok(())
    }

    /// The number of messages successfully written so far.
    pub fn messages_written(&self) -> usize {
        self.msg_count
    }

    /// Return the underlying sink, consuming the encoder.
    pub fn into_inner(self) -> W {
        self.writer
    }

    // The sink may accept fewer bytes than offered per call; keep
    // offering the remaining suffix until everything is written or
    // the sink reports a hard error.
    fn write_all(&mut self, mut buf: &[u8]) -> Result<(), Error> {
        while !buf.is_empty() {
            let written = self.writer.write(buf).map_err(Error::Write)?;

            if written == 0 {
                return Err(Error::Write(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                )));
            }

            buf = &buf[written..];
        }

        Ok(())
    }
}
