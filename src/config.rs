use serde::Deserialize;

/// 런타임 설정. JSON 등에서 읽어 올 수 있고, 빠진 항목은 기본값을 쓴다.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 호출 프레임 상한
    pub max_frames: usize,
    /// 식 평가 스택 상한
    pub max_stack: usize,
    /// 컴파일 단위 실행 전에 디스어셈블리를 debug 로그로 남긴다.
    pub dump_bytecode: bool,
    /// `silently` 없는 catch가 에러 보고를 출력할지
    pub log_caught_errors: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_frames: 1024,
            max_stack: 4096,
            dump_bytecode: false,
            log_caught_errors: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "max_frames": 16 }"#).unwrap();
        assert_eq!(
            config,
            RuntimeConfig {
                max_frames: 16,
                ..RuntimeConfig::default()
            }
        );
    }
}
