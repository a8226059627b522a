//! A parsed (or constructed) compressed frame: header plus macroblock grid,
//! with the first-partition and token-partition coding that connects them
//! to bytes.

use std::cell::Cell;

use crate::bool_coder::{BoolDecoder, BoolEncoder};
use crate::chunk::{assemble_frame, UncompressedChunk};
use crate::consts::{
    B_MODE_TREE, DEFAULT_B_MODE_PROBS, KF_B_MODE_PROBS, KF_UV_MODE_PROBS, KF_Y_MODE_PROBS,
    KF_Y_MODE_TREE, MV_PARTITIONS, SEGMENT_ID_TREE, SPLIT_MV_PROBS, SPLIT_MV_TREE,
    SUBMV_REF_PROBS, SUBMV_REF_TREE, MV_REF_TREE, UV_MODE_TREE, Y_MODE_TREE,
};
use crate::error::{CodecError, Result};
use crate::frame_header::FrameHeader;
use crate::macroblock::{
    clamp_mv, implied_b_mode, motion_vector_census, partition_first_subblocks, sub_mv_context,
    sub_mv_neighbors, InterMode, MacroblockGrid, MbKind, Reference, SignBias, SubMvMode,
};
use crate::mv::{decode_mv, encode_mv, MotionVector};
use crate::predict::intra::{BMode, UvMode, YMode};
use crate::probability::ProbabilityTables;
use crate::tokens::{
    count_macroblock_tokens, decode_macroblock_tokens, encode_macroblock_tokens, new_branch_counts,
    TokenBranchCounts, TokenContexts,
};

#[derive(Debug, Clone)]
pub struct Frame {
    pub show: bool,
    pub width: u16,
    pub height: u16,
    pub header: FrameHeader,
    pub macroblocks: MacroblockGrid,
}

impl Frame {
    pub fn new(header: FrameHeader, width: u16, height: u16) -> Self {
        let columns = (width as usize).div_ceil(16);
        let rows = (height as usize).div_ceil(16);
        Self {
            show: true,
            width,
            height,
            header,
            macroblocks: MacroblockGrid::new(columns, rows),
        }
    }

    pub fn is_key_frame(&self) -> bool {
        self.header.is_key_frame()
    }

    pub fn sign_bias(&self) -> SignBias {
        match &self.header.inter {
            Some(inter) => SignBias {
                golden: inter.sign_bias_golden,
                alternate: inter.sign_bias_alternate,
            },
            None => SignBias::default(),
        }
    }

    /// Parse a complete frame from an uncompressed chunk. For key frames
    /// pass the default probability tables; the header's own updates are
    /// applied to a copy internally, mirroring the serialize side.
    pub fn parse(
        chunk: &UncompressedChunk,
        width: u16,
        height: u16,
        frame_probs: &ProbabilityTables,
        segment_map: Option<&[u8]>,
    ) -> Result<Self> {
        // one first-overrun flag for the whole frame, shared by the header
        // partition and every DCT partition
        let overrun = Cell::new(false);

        let mut first = BoolDecoder::with_overrun_flag(chunk.first_partition, &overrun);
        let header = if chunk.key_frame {
            FrameHeader::parse_key_frame(&mut first)?
        } else {
            FrameHeader::parse_inter_frame(&mut first)?
        };

        let mut frame = Frame::new(header, width, height);
        frame.show = chunk.show_frame;

        // mode and motion-vector probabilities in effect for this frame
        let mut effective_probs = frame_probs.clone();
        effective_probs.update(&frame.header);

        frame.parse_macroblock_headers(&mut first, &effective_probs, segment_map)?;

        let partitions = chunk.dct_partitions(frame.header.dct_partition_count())?;
        frame.parse_token_partitions(&partitions, &effective_probs, &overrun)?;

        Ok(frame)
    }

    fn parse_macroblock_headers(
        &mut self,
        decoder: &mut BoolDecoder,
        probs: &ProbabilityTables,
        segment_map: Option<&[u8]>,
    ) -> Result<()> {
        let columns = self.macroblocks.columns();
        let rows = self.macroblocks.rows();
        let key_frame = self.is_key_frame();
        let update_map = self
            .header
            .update_segmentation
            .as_ref()
            .map(|seg| seg.update_map)
            .unwrap_or(false);
        let segment_tree_probs = self
            .header
            .update_segmentation
            .as_ref()
            .map(|seg| seg.tree_probs())
            .unwrap_or([255; 3]);
        let prob_skip = self.header.prob_skip_false;
        let sign_bias = self.sign_bias();

        for row in 0..rows {
            for column in 0..columns {
                let segment_id = update_map
                    .then(|| decoder.tree(&SEGMENT_ID_TREE, &segment_tree_probs, 0));
                let segment = segment_id.unwrap_or_else(|| {
                    segment_map
                        .map(|map| map[row * columns + column])
                        .unwrap_or(0)
                });
                let skip_coeff = prob_skip.map(|prob| decoder.get(prob));

                let kind = if key_frame {
                    self.parse_key_intra_modes(decoder, column, row)
                } else {
                    self.parse_inter_modes(decoder, probs, sign_bias, column, row)?
                };

                let mb = self.macroblocks.at_mut(column, row);
                mb.segment_id = segment_id;
                mb.segment = segment;
                mb.skip_coeff = skip_coeff;
                mb.kind = kind;
            }
        }
        Ok(())
    }

    fn parse_key_intra_modes(
        &mut self,
        decoder: &mut BoolDecoder,
        column: usize,
        row: usize,
    ) -> MbKind {
        let y_mode = YMode::from_index(decoder.tree(&KF_Y_MODE_TREE, &KF_Y_MODE_PROBS, 0));

        let mut b_modes = [implied_b_mode(y_mode); 16];
        if y_mode == YMode::B {
            for index in 0..16 {
                let above = if index >= 4 {
                    b_modes[index - 4]
                } else {
                    self.macroblocks
                        .get(column as isize, row as isize - 1)
                        .map(|mb| mb.b_mode_at(index + 12))
                        .unwrap_or(BMode::Dc)
                };
                let left = if index % 4 != 0 {
                    b_modes[index - 1]
                } else {
                    self.macroblocks
                        .get(column as isize - 1, row as isize)
                        .map(|mb| mb.b_mode_at(index + 3))
                        .unwrap_or(BMode::Dc)
                };
                let probs = &KF_B_MODE_PROBS[above as usize][left as usize];
                b_modes[index] = BMode::from_index(decoder.tree(&B_MODE_TREE, probs, 0));
            }
        }

        let uv_mode = UvMode::from_index(decoder.tree(&UV_MODE_TREE, &KF_UV_MODE_PROBS, 0));
        MbKind::Intra {
            y_mode,
            b_modes,
            uv_mode,
        }
    }

    fn parse_inter_modes(
        &mut self,
        decoder: &mut BoolDecoder,
        probs: &ProbabilityTables,
        sign_bias: SignBias,
        column: usize,
        row: usize,
    ) -> Result<MbKind> {
        let inter_fields = self
            .header
            .inter
            .as_ref()
            .ok_or_else(|| CodecError::internal("mb parse", "inter modes on key frame"))?
            .clone();

        if !decoder.get(inter_fields.prob_inter) {
            // intra macroblock in an inter frame
            let y_mode = YMode::from_index(decoder.tree(&Y_MODE_TREE, &probs.y_mode_probs, 0));
            let mut b_modes = [implied_b_mode(y_mode); 16];
            if y_mode == YMode::B {
                for mode in b_modes.iter_mut() {
                    *mode = BMode::from_index(decoder.tree(
                        &B_MODE_TREE,
                        &DEFAULT_B_MODE_PROBS,
                        0,
                    ));
                }
            }
            let uv_mode = UvMode::from_index(decoder.tree(&UV_MODE_TREE, &probs.uv_mode_probs, 0));
            return Ok(MbKind::Intra {
                y_mode,
                b_modes,
                uv_mode,
            });
        }

        let reference = if !decoder.get(inter_fields.prob_references_last) {
            Reference::Last
        } else if !decoder.get(inter_fields.prob_references_golden) {
            Reference::Golden
        } else {
            Reference::Alternate
        };

        let census = motion_vector_census(&self.macroblocks, column, row, reference, sign_bias);
        let mode_probs = census.mode_probs();
        let mode = InterMode::from_index(decoder.tree(&MV_REF_TREE, &mode_probs, 0));

        let mut sub_modes = [SubMvMode::New; 16];
        let mut sub_mvs = [MotionVector::default(); 16];
        let mut partition = None;
        let mv;

        match mode {
            InterMode::Zero => {
                mv = MotionVector::default();
                sub_mvs = [mv; 16];
            }
            InterMode::Nearest => {
                mv = census.nearest;
                sub_mvs = [mv; 16];
            }
            InterMode::Near => {
                mv = census.near;
                sub_mvs = [mv; 16];
            }
            InterMode::New => {
                let delta = decode_mv(decoder, &probs.motion_vector_probs);
                mv = delta + census.best;
                sub_mvs = [mv; 16];
            }
            InterMode::Split => {
                let scheme = decoder.tree(&SPLIT_MV_TREE, &SPLIT_MV_PROBS, 0);
                partition = Some(scheme);
                let assignment = &MV_PARTITIONS[scheme as usize];

                for (part, &first_sb) in partition_first_subblocks(scheme).iter().enumerate() {
                    let (left, above) =
                        sub_mv_neighbors(&self.macroblocks, column, row, &sub_mvs, first_sb);
                    let context = sub_mv_context(left, above);
                    let sub_mode = SubMvMode::from_index(decoder.tree(
                        &SUBMV_REF_TREE,
                        &SUBMV_REF_PROBS[context],
                        0,
                    ));
                    let part_mv = match sub_mode {
                        SubMvMode::Left => left,
                        SubMvMode::Above => above,
                        SubMvMode::Zero => MotionVector::default(),
                        SubMvMode::New => {
                            decode_mv(decoder, &probs.motion_vector_probs) + census.best
                        }
                    };
                    for (index, &assigned) in assignment.iter().enumerate() {
                        if assigned as usize == part {
                            sub_modes[index] = sub_mode;
                            sub_mvs[index] = part_mv;
                        }
                    }
                }
                mv = sub_mvs[15];
            }
        }

        Ok(MbKind::Inter {
            mode,
            reference,
            mv,
            partition,
            sub_modes,
            sub_mvs,
        })
    }

    fn parse_token_partitions(
        &mut self,
        partitions: &[&[u8]],
        probs: &ProbabilityTables,
        overrun: &Cell<bool>,
    ) -> Result<()> {
        let columns = self.macroblocks.columns();
        let rows = self.macroblocks.rows();
        let mut decoders: Vec<BoolDecoder> = partitions
            .iter()
            .map(|bytes| BoolDecoder::with_overrun_flag(bytes, overrun))
            .collect();
        let mut contexts = TokenContexts::new(columns);

        for row in 0..rows {
            contexts.start_row();
            let decoder = &mut decoders[row % partitions.len()];
            for column in 0..columns {
                let mb = self.macroblocks.at_mut(column, row);
                decode_macroblock_tokens(decoder, mb, column, &mut contexts, &probs.coeff_probs)?;
            }
        }
        Ok(())
    }

    /// Serialize against the probability tables in effect before this frame;
    /// header updates are applied to a copy internally, mirroring the parse
    /// side. Key frames always code against the fixed defaults, exactly as
    /// a decoder parses them.
    pub fn serialize(&self, state_probs: &ProbabilityTables) -> Result<Vec<u8>> {
        let mut effective_probs = if self.is_key_frame() {
            ProbabilityTables::default()
        } else {
            state_probs.clone()
        };
        effective_probs.update(&self.header);

        let first_partition = self.serialize_first_partition(&effective_probs)?;
        let token_partitions = self.serialize_token_partitions(&effective_probs)?;

        assemble_frame(
            self.is_key_frame(),
            self.show,
            self.width,
            self.height,
            &first_partition,
            &token_partitions,
        )
    }

    fn serialize_first_partition(&self, probs: &ProbabilityTables) -> Result<Vec<u8>> {
        let mut encoder = BoolEncoder::new();
        self.header.write(&mut encoder);

        let segment_tree_probs = self
            .header
            .update_segmentation
            .as_ref()
            .map(|seg| seg.tree_probs())
            .unwrap_or([255; 3]);
        let sign_bias = self.sign_bias();

        for row in 0..self.macroblocks.rows() {
            for column in 0..self.macroblocks.columns() {
                self.serialize_macroblock_header(
                    &mut encoder,
                    probs,
                    &segment_tree_probs,
                    sign_bias,
                    column,
                    row,
                )?;
            }
        }
        Ok(encoder.finish())
    }

    fn serialize_macroblock_header(
        &self,
        encoder: &mut BoolEncoder,
        probs: &ProbabilityTables,
        segment_tree_probs: &[u8; 3],
        sign_bias: SignBias,
        column: usize,
        row: usize,
    ) -> Result<()> {
        let mb = self.macroblocks.at(column, row);
        let update_map = self
            .header
            .update_segmentation
            .as_ref()
            .map(|seg| seg.update_map)
            .unwrap_or(false);

        if update_map {
            let id = mb.segment_id.ok_or_else(|| {
                CodecError::internal("mb serialize", "segment map update without coded ids")
            })?;
            encoder.put_tree(&SEGMENT_ID_TREE, segment_tree_probs, id, 0);
        }

        match (mb.skip_coeff, self.header.prob_skip_false) {
            (Some(skip), Some(prob)) => encoder.put(skip, prob),
            (None, None) => {}
            _ => {
                return Err(CodecError::internal(
                    "mb serialize",
                    "skip flag disagrees with prob_skip_false presence",
                ))
            }
        }

        if self.is_key_frame() {
            let MbKind::Intra {
                y_mode,
                b_modes,
                uv_mode,
            } = &mb.kind
            else {
                return Err(CodecError::internal("mb serialize", "inter mb in key frame"));
            };

            encoder.put_tree(&KF_Y_MODE_TREE, &KF_Y_MODE_PROBS, *y_mode as u8, 0);
            if *y_mode == YMode::B {
                for index in 0..16 {
                    let above = if index >= 4 {
                        b_modes[index - 4]
                    } else {
                        self.macroblocks
                            .get(column as isize, row as isize - 1)
                            .map(|other| other.b_mode_at(index + 12))
                            .unwrap_or(BMode::Dc)
                    };
                    let left = if index % 4 != 0 {
                        b_modes[index - 1]
                    } else {
                        self.macroblocks
                            .get(column as isize - 1, row as isize)
                            .map(|other| other.b_mode_at(index + 3))
                            .unwrap_or(BMode::Dc)
                    };
                    encoder.put_tree(
                        &B_MODE_TREE,
                        &KF_B_MODE_PROBS[above as usize][left as usize],
                        b_modes[index] as u8,
                        0,
                    );
                }
            }
            encoder.put_tree(&UV_MODE_TREE, &KF_UV_MODE_PROBS, *uv_mode as u8, 0);
            return Ok(());
        }

        let inter_fields = self
            .header
            .inter
            .as_ref()
            .expect("inter frame has inter header fields");

        match &mb.kind {
            MbKind::Intra {
                y_mode,
                b_modes,
                uv_mode,
            } => {
                encoder.put(false, inter_fields.prob_inter);
                encoder.put_tree(&Y_MODE_TREE, &probs.y_mode_probs, *y_mode as u8, 0);
                if *y_mode == YMode::B {
                    for mode in b_modes {
                        encoder.put_tree(&B_MODE_TREE, &DEFAULT_B_MODE_PROBS, *mode as u8, 0);
                    }
                }
                encoder.put_tree(&UV_MODE_TREE, &probs.uv_mode_probs, *uv_mode as u8, 0);
            }
            MbKind::Inter {
                mode,
                reference,
                mv,
                partition,
                sub_modes,
                sub_mvs,
            } => {
                encoder.put(true, inter_fields.prob_inter);
                match reference {
                    Reference::Last => encoder.put(false, inter_fields.prob_references_last),
                    Reference::Golden => {
                        encoder.put(true, inter_fields.prob_references_last);
                        encoder.put(false, inter_fields.prob_references_golden);
                    }
                    Reference::Alternate => {
                        encoder.put(true, inter_fields.prob_references_last);
                        encoder.put(true, inter_fields.prob_references_golden);
                    }
                }

                let census =
                    motion_vector_census(&self.macroblocks, column, row, *reference, sign_bias);
                encoder.put_tree(&MV_REF_TREE, &census.mode_probs(), *mode as u8, 0);

                match mode {
                    InterMode::Zero | InterMode::Nearest | InterMode::Near => {}
                    InterMode::New => {
                        encode_mv(encoder, *mv - census.best, &probs.motion_vector_probs);
                    }
                    InterMode::Split => {
                        let scheme = partition.ok_or_else(|| {
                            CodecError::internal("mb serialize", "SPLITMV without partition id")
                        })?;
                        encoder.put_tree(&SPLIT_MV_TREE, &SPLIT_MV_PROBS, scheme, 0);

                        for &first_sb in &partition_first_subblocks(scheme) {
                            let (left, above) = sub_mv_neighbors(
                                &self.macroblocks,
                                column,
                                row,
                                sub_mvs,
                                first_sb,
                            );
                            let context = sub_mv_context(left, above);
                            let sub_mode = sub_modes[first_sb];
                            encoder.put_tree(
                                &SUBMV_REF_TREE,
                                &SUBMV_REF_PROBS[context],
                                sub_mode as u8,
                                0,
                            );
                            if sub_mode == SubMvMode::New {
                                encode_mv(
                                    encoder,
                                    sub_mvs[first_sb] - census.best,
                                    &probs.motion_vector_probs,
                                );
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn serialize_token_partitions(&self, probs: &ProbabilityTables) -> Result<Vec<Vec<u8>>> {
        let count = self.header.dct_partition_count();
        let mut encoders: Vec<BoolEncoder> = (0..count).map(|_| BoolEncoder::new()).collect();
        let mut contexts = TokenContexts::new(self.macroblocks.columns());

        for row in 0..self.macroblocks.rows() {
            contexts.start_row();
            let encoder = &mut encoders[row % count];
            for column in 0..self.macroblocks.columns() {
                encode_macroblock_tokens(
                    encoder,
                    self.macroblocks.at(column, row),
                    column,
                    &mut contexts,
                    &probs.coeff_probs,
                )?;
            }
        }
        Ok(encoders.into_iter().map(BoolEncoder::finish).collect())
    }

    /// Branch counts for the coefficient-probability optimization.
    pub fn token_branch_counts(&self) -> Result<TokenBranchCounts> {
        let mut counts = new_branch_counts();
        let mut contexts = TokenContexts::new(self.macroblocks.columns());
        for row in 0..self.macroblocks.rows() {
            contexts.start_row();
            for column in 0..self.macroblocks.columns() {
                count_macroblock_tokens(
                    self.macroblocks.at(column, row),
                    column,
                    &mut contexts,
                    &mut counts,
                )?;
            }
        }
        Ok(counts)
    }

    /// New-frame segment map after this frame's (possible) map update.
    pub fn updated_segment_map(&self, previous: Option<&[u8]>) -> Vec<u8> {
        let columns = self.macroblocks.columns();
        let rows = self.macroblocks.rows();
        let mut map = previous
            .map(|m| m.to_vec())
            .unwrap_or_else(|| vec![0; columns * rows]);
        for row in 0..rows {
            for column in 0..columns {
                if let Some(id) = self.macroblocks.at(column, row).segment_id {
                    map[row * columns + column] = id;
                }
            }
        }
        map
    }

    /// Clamp helper bound to this frame's grid.
    pub fn clamp(&self, mv: MotionVector, column: usize, row: usize) -> MotionVector {
        clamp_mv(
            mv,
            column,
            row,
            self.macroblocks.columns(),
            self.macroblocks.rows(),
        )
    }
}
