// Copyright 2024 The nvdec-vaapi-driver Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! JPEG baseline buffer translation.
//!
//! NVDEC consumes a raw JFIF stream, not parsed tables, so the handlers
//! reassemble one: each VA buffer appends its marker segment to the
//! bitstream in submission order (SOI+SOF from the picture parameters, DQT
//! from the IQ matrix, DHT from the Huffman tables, DRI+SOS from the slice
//! parameters) and the slice data supplies the entropy-coded scan.

use crate::codec::Codec;
use crate::codec::HandlerFn;
use crate::codec::PictureContext;
use crate::driver::NvBuffer;
use crate::sys::cuvid::cudaVideoCodec;
use crate::va::VABufferType;
use crate::va::VAProfile;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VAJpegComponent {
    pub component_id: u8,
    pub h_sampling_factor: u8,
    pub v_sampling_factor: u8,
    pub quantiser_table_selector: u8,
}

/// `VAPictureParameterBufferJPEGBaseline` from `va_dec_jpeg.h`.
#[repr(C)]
pub struct VAPictureParameterBufferJPEGBaseline {
    pub picture_width: u16,
    pub picture_height: u16,
    pub components: [VAJpegComponent; 255],
    pub num_components: u8,
    pub color_space: u8,
    pub rotation: u32,
    pub va_reserved: [u32; 4],
}

#[repr(C)]
pub struct VAIQMatrixBufferJPEGBaseline {
    pub load_quantiser_table: [u8; 4],
    pub quantiser_table: [[u8; 64]; 4],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VAHuffmanTable {
    pub num_dc_codes: [u8; 16],
    pub dc_values: [u8; 12],
    pub num_ac_codes: [u8; 16],
    pub ac_values: [u8; 162],
    pub pad: [u8; 2],
}

#[repr(C)]
pub struct VAHuffmanTableBufferJPEGBaseline {
    pub load_huffman_table: [u8; 2],
    pub huffman_table: [VAHuffmanTable; 2],
    pub va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct VAJpegScanComponent {
    pub component_selector: u8,
    pub dc_table_selector: u8,
    pub ac_table_selector: u8,
}

#[repr(C)]
pub struct VASliceParameterBufferJPEGBaseline {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub slice_horizontal_position: u32,
    pub slice_vertical_position: u32,
    pub components: [VAJpegScanComponent; 4],
    pub num_components: u8,
    pub restart_interval: u16,
    pub num_mcus: u32,
    pub va_reserved: [u32; 4],
}

fn push_marker(pic: &mut PictureContext, marker: u8, payload: &[u8]) {
    let len = (payload.len() + 2) as u16;
    pic.bitstream.append(&[0xff, marker]);
    pic.bitstream.append(&len.to_be_bytes());
    pic.bitstream.append(payload);
}

fn picture_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VAPictureParameterBufferJPEGBaseline>() else {
        return;
    };
    pic.pic_params.PicWidthInMbs = (params.picture_width as i32 + 15) / 16;
    pic.pic_params.FrameHeightInMbs = (params.picture_height as i32 + 15) / 16;
    pic.pic_params.intra_pic_flag = 1;

    // SOI, then SOF0 describing the frame.
    pic.bitstream.append(&[0xff, 0xd8]);
    let mut sof = Vec::with_capacity(6 + params.num_components as usize * 3);
    sof.push(8); // sample precision
    sof.extend_from_slice(&params.picture_height.to_be_bytes());
    sof.extend_from_slice(&params.picture_width.to_be_bytes());
    sof.push(params.num_components);
    for component in &params.components[..params.num_components as usize] {
        sof.push(component.component_id);
        sof.push((component.h_sampling_factor << 4) | (component.v_sampling_factor & 0xf));
        sof.push(component.quantiser_table_selector);
    }
    push_marker(pic, 0xc0, &sof);
}

fn iq_matrix(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(iq) = buf.param::<VAIQMatrixBufferJPEGBaseline>() else {
        return;
    };
    for (id, table) in iq.quantiser_table.iter().enumerate() {
        if iq.load_quantiser_table[id] == 0 {
            continue;
        }
        let mut dqt = Vec::with_capacity(65);
        dqt.push(id as u8); // 8-bit precision, table id
        dqt.extend_from_slice(table);
        push_marker(pic, 0xdb, &dqt);
    }
}

fn huffman_tables(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(tables) = buf.param::<VAHuffmanTableBufferJPEGBaseline>() else {
        return;
    };
    for (id, table) in tables.huffman_table.iter().enumerate() {
        if tables.load_huffman_table[id] == 0 {
            continue;
        }
        let dc_count: usize = table.num_dc_codes.iter().map(|&n| n as usize).sum();
        let mut dht = Vec::new();
        dht.push(id as u8); // class 0 (DC), destination id
        dht.extend_from_slice(&table.num_dc_codes);
        dht.extend_from_slice(&table.dc_values[..dc_count.min(12)]);
        push_marker(pic, 0xc4, &dht);

        let ac_count: usize = table.num_ac_codes.iter().map(|&n| n as usize).sum();
        let mut dht = Vec::new();
        dht.push(0x10 | id as u8); // class 1 (AC), destination id
        dht.extend_from_slice(&table.num_ac_codes);
        dht.extend_from_slice(&table.ac_values[..ac_count.min(162)]);
        push_marker(pic, 0xc4, &dht);
    }
}

fn slice_params(pic: &mut PictureContext, buf: &NvBuffer) {
    let Some(params) = buf.param::<VASliceParameterBufferJPEGBaseline>() else {
        return;
    };
    if params.restart_interval > 0 {
        push_marker(pic, 0xdd, &params.restart_interval.to_be_bytes());
    }
    let mut sos = Vec::with_capacity(1 + params.num_components as usize * 2 + 3);
    sos.push(params.num_components);
    for component in &params.components[..params.num_components as usize] {
        sos.push(component.component_selector);
        sos.push((component.dc_table_selector << 4) | (component.ac_table_selector & 0xf));
    }
    // Spectral selection and approximation, fixed for baseline.
    sos.extend_from_slice(&[0, 63, 0]);
    push_marker(pic, 0xda, &sos);
    pic.pending_slices.push((params.slice_data_offset, params.slice_data_size));
}

fn slice_data(pic: &mut PictureContext, buf: &NvBuffer) {
    let data = buf.data();
    let pending = std::mem::take(pic.pending_slices);
    // The scan is one "slice" for NVDEC purposes: everything from SOI to
    // EOI, starting at offset 0 of the assembled stream.
    if pic.pic_params.nNumSlices == 0 {
        pic.slice_offsets.append(&0u32.to_ne_bytes());
        pic.pic_params.nNumSlices = 1;
    }
    if pending.is_empty() {
        pic.bitstream.append(data);
    } else {
        for (offset, size) in pending {
            let start = offset as usize;
            let end = (start + size as usize).min(data.len());
            if start < end {
                pic.bitstream.append(&data[start..end]);
            }
        }
    }
    pic.bitstream.append(&[0xff, 0xd9]); // EOI
    pic.pic_params.nBitstreamDataLen = pic.bitstream.len() as u32;
}

fn compute_cuda_codec(profile: VAProfile) -> Option<cudaVideoCodec> {
    match profile {
        VAProfile::JPEGBaseline => Some(cudaVideoCodec::JPEG),
        _ => None,
    }
}

fn handler(buffer_type: VABufferType) -> Option<HandlerFn> {
    match buffer_type {
        VABufferType::PictureParameter => Some(picture_params),
        VABufferType::IQMatrix => Some(iq_matrix),
        VABufferType::HuffmanTable => Some(huffman_tables),
        VABufferType::SliceParameter => Some(slice_params),
        VABufferType::SliceData => Some(slice_data),
        _ => None,
    }
}

pub static CODEC: Codec = Codec {
    name: "jpeg",
    supported_profiles: &[VAProfile::JPEGBaseline],
    compute_cuda_codec,
    handler,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests_support::TestPicture;

    #[test]
    fn test_stream_reassembly_brackets_scan_with_soi_eoi() {
        let mut picture = TestPicture::new(&CODEC);
        let mut params: VAPictureParameterBufferJPEGBaseline =
            unsafe { std::mem::zeroed() };
        params.picture_width = 64;
        params.picture_height = 48;
        params.num_components = 3;
        params.components[0] =
            VAJpegComponent { component_id: 1, h_sampling_factor: 2, v_sampling_factor: 2, quantiser_table_selector: 0 };
        params.components[1] =
            VAJpegComponent { component_id: 2, h_sampling_factor: 1, v_sampling_factor: 1, quantiser_table_selector: 1 };
        params.components[2] =
            VAJpegComponent { component_id: 3, h_sampling_factor: 1, v_sampling_factor: 1, quantiser_table_selector: 1 };
        picture.submit(VABufferType::PictureParameter, &params);
        picture.submit_bytes(VABufferType::SliceData, &[0xab; 16]);

        let stream = picture.bitstream();
        assert_eq!(&stream[..2], &[0xff, 0xd8], "missing SOI");
        assert_eq!(&stream[2..4], &[0xff, 0xc0], "missing SOF0");
        assert_eq!(&stream[stream.len() - 2..], &[0xff, 0xd9], "missing EOI");
        assert_eq!(picture.params().nNumSlices, 1);
        assert_eq!(picture.params().nBitstreamDataLen as usize, stream.len());
    }
}
