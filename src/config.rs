//! Configuração do Oasis carregada a partir de `oasis.toml`.
//!
//! A struct [`OasisConfig`] contém todos os parâmetros configuráveis: o comando
//! do agente, os marcadores do protocolo interativo, a tabela de aliases de
//! modelo e os limites de tempo do supervisor.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis `OASIS_LISTEN_ADDR`, `OASIS_SERVER_URL` e `OASIS_AGENT_PROGRAM`
//! têm precedência sobre o arquivo.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::OasisError;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "oasis.toml";

/// Configuração de nível superior carregada de `oasis.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct OasisConfig {
    /// Endereço em que o servidor HTTP escuta.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// URL base usada pelos subcomandos cliente (`submit`, `status`, ...).
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Como lançar e conversar com o agente externo.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Limites de tempo e retenção do supervisor.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Parâmetros do processo agente e do seu protocolo de prompts.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Executável do agente.
    #[serde(default = "default_program")]
    pub program: String,

    /// Argumentos fixos passados antes da seleção de modelo.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Flag que precede o nome do modelo na linha de comando.
    #[serde(default = "default_model_flag")]
    pub model_flag: String,

    /// Diretório de trabalho do processo; herda o do servidor se ausente.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Modelo usado quando a requisição não especifica um.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Tabela fixa de aliases: nome exposto ao usuário -> nome aceito pelo agente.
    #[serde(default = "default_model_aliases")]
    pub model_aliases: HashMap<String, String>,

    /// Trecho que identifica o prompt "digite a query".
    #[serde(default = "default_query_prompt")]
    pub query_prompt: String,

    /// Trecho que identifica o prompt "executar outra query?".
    #[serde(default = "default_continue_prompt")]
    pub continue_prompt: String,

    /// Resposta negativa enviada ao segundo prompt.
    #[serde(default = "default_continue_answer")]
    pub continue_answer: String,

    /// Marcadores de conclusão (comparação sem diferenciar maiúsculas).
    #[serde(default = "default_completion_markers")]
    pub completion_markers: Vec<String>,

    /// Marcadores de erro que encerram a execução imediatamente.
    #[serde(default = "default_error_markers")]
    pub error_markers: Vec<String>,

    /// Quantos bytes finais da saída são examinados em busca do marcador de conclusão.
    #[serde(default = "default_output_tail_bytes")]
    pub output_tail_bytes: usize,
}

/// Limites de tempo, retenção e validação.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Espera máxima pelo primeiro prompt, em segundos.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Duração máxima de uma execução a partir de `started_at`, em segundos.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,

    /// Espera máxima pela coleta do processo após um kill, em milissegundos.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Por quanto tempo workflows terminais ficam disponíveis para consulta, em segundos.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Intervalo entre varreduras de retenção, em segundos.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Tamanho máximo aceito para uma query, em caracteres.
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

// Valor padrão do endereço de escuta: "127.0.0.1:8000".
fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_server_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-m".to_string(), "gui_agents.s1.cli_app".to_string()]
}

fn default_model_flag() -> String {
    "--model".to_string()
}

// Valor padrão do modelo: "gpt-4.1", traduzido pela tabela de aliases.
fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_model_aliases() -> HashMap<String, String> {
    HashMap::from([("gpt-4.1".to_string(), "gpt-4o".to_string())])
}

fn default_query_prompt() -> String {
    "Query:".to_string()
}

fn default_continue_prompt() -> String {
    "provide another query?".to_string()
}

fn default_continue_answer() -> String {
    "n".to_string()
}

fn default_completion_markers() -> Vec<String> {
    ["task completed", "workflow successfully executed", "task finished", "done"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_error_markers() -> Vec<String> {
    vec!["Traceback (most recent call last)".to_string()]
}

fn default_output_tail_bytes() -> usize {
    8192
}

fn default_handshake_timeout_secs() -> u64 {
    60
}

// Valor padrão do orçamento de execução: 5 minutos.
fn default_execution_timeout_secs() -> u64 {
    300
}

fn default_kill_grace_ms() -> u64 {
    5000
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_max_query_chars() -> usize {
    2000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            model_flag: default_model_flag(),
            working_dir: None,
            default_model: default_model(),
            model_aliases: default_model_aliases(),
            query_prompt: default_query_prompt(),
            continue_prompt: default_continue_prompt(),
            continue_answer: default_continue_answer(),
            completion_markers: default_completion_markers(),
            error_markers: default_error_markers(),
            output_tail_bytes: default_output_tail_bytes(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            kill_grace_ms: default_kill_grace_ms(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

impl Default for OasisConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_url: default_server_url(),
            agent: AgentConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl LimitsConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl OasisConfig {
    /// Carrega a configuração de `path`, ou de `oasis.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self, OasisError> {
        let path = path.unwrap_or(Path::new(CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<OasisConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("OASIS_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(url) = lookup("OASIS_SERVER_URL")
            && !url.is_empty()
        {
            self.server_url = url;
        }
        if let Some(program) = lookup("OASIS_AGENT_PROGRAM")
            && !program.is_empty()
        {
            self.agent.program = program;
        }
    }

    /// Rejeita combinações que deixariam o supervisor inutilizável.
    pub fn validate(&self) -> Result<(), OasisError> {
        if self.agent.program.trim().is_empty() {
            return Err(OasisError::Config("agent.program must not be empty".into()));
        }
        if self.agent.query_prompt.is_empty() || self.agent.continue_prompt.is_empty() {
            return Err(OasisError::Config("prompt markers must not be empty".into()));
        }
        if self.limits.handshake_timeout_secs == 0 || self.limits.execution_timeout_secs == 0 {
            return Err(OasisError::Config("timeouts must be greater than zero".into()));
        }
        if self.agent.output_tail_bytes == 0 {
            return Err(OasisError::Config(
                "agent.output_tail_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
