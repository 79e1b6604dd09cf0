use nom::bytes::complete::take;
use nom::combinator::{all_consuming, map};
use nom::number::complete::u8;
use nom::sequence::tuple;
use nom::IResult;

use crate::types::OnRequestData;

type Buf = [u8];

/// A device response split into its fields, borrowing the payload.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(crate) struct ResponseFields<'a> {
    pub status: u8,
    pub payload: &'a Buf,
    pub od: OnRequestData,
    pub checksum: u8,
}

/// The two byte Type 0 reply: `[od, checksum]`. The status isn't
/// transmitted in this form and is reported as zero.
pub(crate) fn type0_response(buf: &Buf) -> IResult<&Buf, ResponseFields<'_>> {
    map(
        all_consuming(tuple((u8, u8))),
        |(od, checksum)| ResponseFields {
            status: 0,
            payload: &buf[..1],
            od: OnRequestData::One(od),
            checksum,
        },
    )(buf)
}

/// `[status] + pd_in + od_bytes + [checksum]`, where the PD length is
/// whatever remains between the status byte and the OD bytes.
pub(crate) fn cyclic_response(buf: &Buf, od_len: usize) -> IResult<&Buf, ResponseFields<'_>> {
    let pd_len = buf.len().saturating_sub(2 + od_len);
    map(
        all_consuming(tuple((u8, take(pd_len), on_request_data(od_len), u8))),
        |(status, payload, od, checksum)| ResponseFields {
            status,
            payload,
            od,
            checksum,
        },
    )(buf)
}

fn on_request_data<'a>(od_len: usize) -> impl FnMut(&'a Buf) -> IResult<&'a Buf, OnRequestData> {
    move |buf: &'a Buf| {
        if od_len == 2 {
            map(tuple((u8, u8)), |(od, od2)| OnRequestData::Two(od, od2))(buf)
        } else {
            map(u8, OnRequestData::One)(buf)
        }
    }
}
