//! Interface de linha de comando do Oasis baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, submit, status,
//! cancel, active) e flags globais (--server, --config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Oasis: supervisor que transforma um agente de automação interativo em um serviço de workflows.
#[derive(Debug, Parser)]
#[command(name = "oasis", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// URL do servidor usado pelos subcomandos cliente (sobrepõe `server_url`).
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Caminho do arquivo de configuração (padrão: ./oasis.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o servidor HTTP e o supervisor de workflows.
    Serve {
        /// Endereço de escuta (sobrepõe `listen_addr`).
        #[arg(long)]
        listen: Option<String>,
    },

    /// Envia uma query para execução.
    Submit {
        /// Descrição da tarefa em linguagem natural.
        query: String,

        /// Modelo ou alias a usar; o padrão do servidor se ausente.
        #[arg(long)]
        model: Option<String>,

        /// Acompanha o workflow até um estado terminal.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },

    /// Mostra o status de um workflow.
    Status {
        /// Identificador retornado por `submit`.
        id: String,

        /// Imprime também a saída capturada do agente.
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Cancela um workflow; cancelar um workflow terminado não tem efeito.
    Cancel {
        /// Identificador retornado por `submit`.
        id: String,
    },

    /// Lista os workflows pendentes ou em execução.
    Active,
}
