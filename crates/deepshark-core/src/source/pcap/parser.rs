use std::fs::File;
use std::path::Path;

use bytes::Bytes;
use pcap_parser::{
    Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader,
    traits::PcapReaderIterator,
};

use crate::frame::FrameRecord;
use crate::source::{FrameSource, SourceError};

use super::error::PcapSourceError;
use super::reader::{
    CaptureFormat, READER_BUFFER_SIZE, interface_linktype, legacy_timestamp, ng_timestamp,
    sniff_format,
};

/// Streams frames out of a `.pcap` or `.pcapng` file.
pub struct PcapFileSource {
    inner: PcapReader,
    next_number: u32,
}

enum PcapReader {
    Legacy {
        reader: LegacyPcapReader<File>,
        linktype: Linktype,
    },
    Ng {
        reader: PcapNGReader<File>,
        linktypes: Vec<Linktype>,
    },
}

impl PcapFileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let inner = create_reader(file)?;
        tracing::debug!(path = %path.display(), "capture opened");
        Ok(Self {
            inner,
            next_number: 1,
        })
    }
}

impl FrameSource for PcapFileSource {
    fn next_frame(&mut self) -> Result<Option<FrameRecord>, SourceError> {
        let record = next_record(&mut self.inner, self.next_number)?;
        if record.is_some() {
            self.next_number += 1;
        }
        Ok(record)
    }
}

fn create_reader(mut file: File) -> Result<PcapReader, PcapSourceError> {
    match sniff_format(&mut file)? {
        CaptureFormat::Ng => {
            let reader = PcapNGReader::new(READER_BUFFER_SIZE, file).map_err(|e| {
                PcapSourceError::Format {
                    context: "pcapng reader init",
                    message: e.to_string(),
                }
            })?;
            Ok(PcapReader::Ng {
                reader,
                linktypes: Vec::new(),
            })
        }
        CaptureFormat::Legacy => {
            let reader = LegacyPcapReader::new(READER_BUFFER_SIZE, file).map_err(|e| {
                PcapSourceError::Format {
                    context: "pcap reader init",
                    message: e.to_string(),
                }
            })?;
            Ok(PcapReader::Legacy {
                reader,
                linktype: Linktype::ETHERNET,
            })
        }
    }
}

fn captured(data: &[u8], caplen: u32) -> Bytes {
    let len = (caplen as usize).min(data.len());
    Bytes::copy_from_slice(&data[..len])
}

fn next_record(reader: &mut PcapReader, number: u32) -> Result<Option<FrameRecord>, PcapSourceError> {
    loop {
        match reader {
            PcapReader::Legacy { reader, linktype } => match reader.next() {
                Ok((offset, block)) => {
                    let record = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            *linktype = header.network;
                            None
                        }
                        PcapBlockOwned::Legacy(packet) => {
                            let data = captured(packet.data, packet.caplen);
                            Some(
                                FrameRecord::new(number, *linktype, data)
                                    .with_timestamp(legacy_timestamp(packet.ts_sec, packet.ts_usec))
                                    .with_reported_len(packet.origlen as usize),
                            )
                        }
                        _ => None,
                    };
                    reader.consume(offset);
                    if record.is_some() {
                        return Ok(record);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    reader.refill().map_err(|e| PcapSourceError::Format {
                        context: "pcap reader refill",
                        message: e.to_string(),
                    })?;
                }
                Err(e) => {
                    return Err(PcapSourceError::Format {
                        context: "pcap reader next",
                        message: e.to_string(),
                    });
                }
            },
            PcapReader::Ng { reader, linktypes } => match reader.next() {
                Ok((offset, block)) => {
                    let record = match block {
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            // Interface ids are scoped to their section.
                            linktypes.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(intf)) => {
                            linktypes.push(intf.linktype);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => {
                            let linktype = interface_linktype(linktypes, packet.if_id).ok_or(
                                PcapSourceError::UnknownInterface {
                                    frame: number,
                                    if_id: packet.if_id,
                                },
                            )?;
                            let data = captured(packet.data, packet.caplen);
                            Some(
                                FrameRecord::new(number, linktype, data)
                                    .with_timestamp(ng_timestamp(packet.ts_high, packet.ts_low))
                                    .with_reported_len(packet.origlen as usize),
                            )
                        }
                        _ => None,
                    };
                    reader.consume(offset);
                    if record.is_some() {
                        return Ok(record);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    reader.refill().map_err(|e| PcapSourceError::Format {
                        context: "pcapng reader refill",
                        message: e.to_string(),
                    })?;
                }
                Err(e) => {
                    return Err(PcapSourceError::Format {
                        context: "pcapng reader next",
                        message: e.to_string(),
                    });
                }
            },
        }
    }
}
