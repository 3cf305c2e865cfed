//! 纠删码引擎接口
//!
//! 编码器和解码器只通过 [`ErasureCodec`] 使用Reed-Solomon运算，每次调用都是独立的会话。
//! 解码时引擎通过 [`RecoverySink`] 向调用方申请存储来写入重建的源符号。

use crate::error::FecError;
use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::trace;

/// 单次编解码会话的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    /// 源符号数 N
    pub source_symbols: usize,
    /// 修复符号数 K
    pub repair_symbols: usize,
    /// 符号长度（字节）
    pub symbol_len: usize,
}

/// 解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// 所有缺失的源符号都已重建
    Complete,
    /// 独立符号不足，列出未能重建的源符号索引
    Incomplete { missing: Vec<usize> },
}

/// 重建符号的存储提供者
pub trait RecoverySink {
    /// 为索引 `esi` 的源符号申请 `len` 字节的存储，引擎会写满它
    fn symbol_buffer(&mut self, esi: usize, len: usize) -> Result<&mut [u8], FecError>;
}

/// 纠删码引擎
pub trait ErasureCodec: Send + Sync {
    /// 由 N 个源符号生成 K 个修复符号
    ///
    /// 源符号可以短于 `symbol_len`，不足部分按0填充；
    /// `repair` 中每个切片长度必须等于 `symbol_len`。
    fn encode(
        &self,
        params: &CodecParams,
        sources: &[&[u8]],
        repair: &mut [&mut [u8]],
    ) -> Result<(), FecError>;

    /// 由已知符号重建缺失的源符号
    ///
    /// `symbols` 长度为 N+K，前N个是源符号，后K个是修复符号，缺失的为 `None`。
    fn decode(
        &self,
        params: &CodecParams,
        symbols: &[Option<&[u8]>],
        sink: &mut dyn RecoverySink,
    ) -> Result<DecodeStatus, FecError>;
}

/// 基于 reed-solomon-erasure 的 GF(2^8) 实现
#[derive(Debug, Default, Clone, Copy)]
pub struct ReedSolomonCodec;

impl ReedSolomonCodec {
    fn session(params: &CodecParams) -> Result<ReedSolomon, FecError> {
        if params.symbol_len == 0 {
            return Err(FecError::Codec("符号长度为0".to_string()));
        }
        ReedSolomon::new(params.source_symbols, params.repair_symbols)
            .map_err(|e| FecError::Codec(format!("ReedSolomon初始化失败: {:?}", e)))
    }

    fn padded(symbol: &[u8], symbol_len: usize) -> Result<Vec<u8>, FecError> {
        if symbol.len() > symbol_len {
            return Err(FecError::Codec(format!(
                "符号长度{}超过{}",
                symbol.len(),
                symbol_len
            )));
        }
        let mut shard = vec![0u8; symbol_len];
        shard[..symbol.len()].copy_from_slice(symbol);
        Ok(shard)
    }
}

impl ErasureCodec for ReedSolomonCodec {
    fn encode(
        &self,
        params: &CodecParams,
        sources: &[&[u8]],
        repair: &mut [&mut [u8]],
    ) -> Result<(), FecError> {
        let rs = Self::session(params)?;

        if sources.len() != params.source_symbols || repair.len() != params.repair_symbols {
            return Err(FecError::Codec(format!(
                "符号数不符: {}+{}，期望{}+{}",
                sources.len(),
                repair.len(),
                params.source_symbols,
                params.repair_symbols
            )));
        }

        let data = sources
            .iter()
            .map(|s| Self::padded(s, params.symbol_len))
            .collect::<Result<Vec<_>, _>>()?;

        rs.encode_sep(data.as_slice(), repair)
            .map_err(|e| FecError::Codec(format!("FEC编码失败: {:?}", e)))?;

        trace!(
            "RS编码: {}个源符号 -> {}个修复符号, 符号长度{}",
            params.source_symbols, params.repair_symbols, params.symbol_len
        );
        Ok(())
    }

    fn decode(
        &self,
        params: &CodecParams,
        symbols: &[Option<&[u8]>],
        sink: &mut dyn RecoverySink,
    ) -> Result<DecodeStatus, FecError> {
        let rs = Self::session(params)?;
        let total = params.source_symbols + params.repair_symbols;

        if symbols.len() != total {
            return Err(FecError::Codec(format!(
                "符号表长度{}，期望{}",
                symbols.len(),
                total
            )));
        }

        let mut shards = symbols
            .iter()
            .map(|s| s.map(|s| Self::padded(s, params.symbol_len)).transpose())
            .collect::<Result<Vec<Option<Vec<u8>>>, _>>()?;

        let missing: Vec<usize> = (0..params.source_symbols)
            .filter(|&i| shards[i].is_none())
            .collect();
        if missing.is_empty() {
            return Ok(DecodeStatus::Complete);
        }

        if let Err(e) = rs.reconstruct_data(shards.as_mut_slice()) {
            trace!("RS解码未完成: {:?}", e);
            return Ok(DecodeStatus::Incomplete { missing });
        }

        for esi in missing {
            let Some(shard) = shards[esi].as_ref() else {
                continue;
            };
            let buf = sink.symbol_buffer(esi, params.symbol_len)?;
            buf.copy_from_slice(shard);
        }

        Ok(DecodeStatus::Complete)
    }
}
